//! Inbound message dispatch for the broadcast gateway.
//!
//! Each text frame is handled on its own; a failing handler answers the
//! sender with an `error` frame and the connection stays open.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vanguard_core::{
    terminal_callbacks, Error, Result, RunStatus, ScenarioOrchestrator, Target, TerminalRegistry,
};
use vanguard_tools::{
    Notification, ProcessCallbacks, ProcessContext, ProcessSpec, ProcessSupervisor,
    TerminationCause, ToolCatalog,
};

use crate::websocket::hub::{Hub, Outbound};
use crate::websocket::protocol::{string_parameters, ClientMessage, ServerFrame};

/// Message types this gateway understands; anything else is ignored.
const KNOWN_TYPES: &[&str] = &[
    "subscribe-scenario",
    "unsubscribe-scenario",
    "request-execution-history",
    "terminal-command",
    "execute",
    "stop",
    "stop-scenario",
    "clear-terminal",
    "execute-multi",
    "ping",
];

/// Shared context for message dispatch.
pub(crate) struct DispatchContext<'a> {
    pub conn_id: Uuid,
    pub hub: &'a Arc<Hub>,
    pub supervisor: &'a Arc<ProcessSupervisor>,
    pub terminals: &'a Arc<TerminalRegistry>,
    pub scenarios: &'a Arc<ScenarioOrchestrator>,
    pub catalog: &'a Arc<ToolCatalog>,
}

/// Handle one inbound text frame. Returns the direct reply, if any.
pub(crate) async fn handle_text(text: &str, ctx: &DispatchContext<'_>) -> Option<String> {
    if text.trim() == "ping" {
        return Some("pong".to_string());
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            return Some(
                ServerFrame::error(format!("Invalid message format: {}", e), None, "invalid_message")
                    .to_json(),
            );
        }
    };

    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
    if !KNOWN_TYPES.contains(&kind.as_str()) {
        warn!(conn_id = %ctx.conn_id, message_type = %kind, "Ignoring unknown message type");
        return None;
    }

    let tab_id = value.get("tabId").and_then(Value::as_str).map(str::to_string);
    let message: ClientMessage = match serde_json::from_value(value) {
        Ok(m) => m,
        Err(e) => {
            return Some(
                ServerFrame::error(
                    format!("Invalid {} message: {}", kind, e),
                    tab_id.as_deref(),
                    "invalid_message",
                )
                .to_json(),
            );
        }
    };

    match dispatch(message, ctx).await {
        Ok(reply) => reply.map(|frame| frame.to_json()),
        Err(e) => {
            warn!(conn_id = %ctx.conn_id, message_type = %kind, error = %e, "Message handler failed");
            Some(ServerFrame::error(e.to_string(), tab_id.as_deref(), e.code()).to_json())
        }
    }
}

async fn dispatch(message: ClientMessage, ctx: &DispatchContext<'_>) -> Result<Option<ServerFrame>> {
    match message {
        ClientMessage::SubscribeScenario { scenario_id } => {
            if !ctx.hub.subscribe(ctx.conn_id, &scenario_id).await {
                return Err(Error::Internal("connection is not registered".to_string()));
            }
            Ok(Some(ServerFrame::ScenarioSubscriptionConfirmed { scenario_id }))
        }
        ClientMessage::UnsubscribeScenario { scenario_id } => {
            ctx.hub.unsubscribe(ctx.conn_id, &scenario_id).await;
            Ok(None)
        }
        ClientMessage::RequestExecutionHistory { scenario_id } => {
            ctx.hub.request_history(ctx.conn_id, &scenario_id).await;
            Ok(None)
        }
        ClientMessage::TerminalCommand {
            scenario_id,
            attack_id,
            command,
        } => {
            terminal_command(ctx, &scenario_id, attack_id, &command).await?;
            Ok(None)
        }
        ClientMessage::Execute {
            command,
            parameters,
            tab_id,
            project_id,
            campaign_id,
            scenario_id,
            targets,
        } => {
            debug!(
                tab_id = %tab_id,
                project_id = ?project_id,
                campaign_id = ?campaign_id,
                "Execute requested"
            );
            execute(ctx, &tab_id, &command, &parameters, targets.first(), scenario_id, None).await?;
            Ok(None)
        }
        ClientMessage::ExecuteMulti {
            command,
            output_id,
            parameters,
            tab_id,
        } => {
            let process_id = format!("{}:{}", tab_id, output_id);
            execute(ctx, &process_id, &command, &parameters, None, None, Some((tab_id, output_id)))
                .await?;
            Ok(None)
        }
        ClientMessage::Stop {
            tab_id,
            port,
            scenario_id,
        } => {
            let stopped = ctx.supervisor.stop(&tab_id, port).await;
            if scenario_id.is_some() {
                ctx.terminals.update_status(&tab_id, RunStatus::Stopped);
            }
            let message = if stopped {
                format!("Process {} stopped", tab_id)
            } else {
                format!("No running process for {}", tab_id)
            };
            Ok(Some(ServerFrame::Notification {
                level: vanguard_tools::NotificationLevel::Info,
                message,
                tab_id,
            }))
        }
        ClientMessage::StopScenario { scenario_id } => {
            ctx.scenarios.stop(&scenario_id).await?;
            Ok(None)
        }
        ClientMessage::ClearTerminal {
            scenario_id,
            terminal_id,
        } => {
            let owned = ctx
                .terminals
                .get(&terminal_id)
                .is_some_and(|t| t.scenario_id == scenario_id);
            if !owned || !ctx.terminals.clear(&terminal_id) {
                return Err(Error::NotFound {
                    kind: "terminal",
                    id: terminal_id,
                });
            }
            Ok(None)
        }
        ClientMessage::Ping => Ok(Some(ServerFrame::Pong)),
    }
}

/// Run a free-form command in a throwaway terminal of the scenario.
async fn terminal_command(
    ctx: &DispatchContext<'_>,
    scenario_id: &str,
    attack_id: Option<String>,
    command: &str,
) -> Result<()> {
    let short = Uuid::new_v4().simple().to_string();
    let terminal_id = format!("{}-cmd-{}", scenario_id, &short[..8]);
    let attack_label = attack_id.clone().unwrap_or_else(|| "terminal".to_string());
    ctx.terminals
        .create_with_id(&terminal_id, scenario_id, &attack_label, "shell");
    ctx.terminals.update_status(&terminal_id, RunStatus::Running);

    let context = ProcessContext {
        scenario_id: Some(scenario_id.to_string()),
        attack_id,
        tool: Some("shell".to_string()),
        container_id: None,
    };
    let started = ctx
        .supervisor
        .start(
            &terminal_id,
            ProcessSpec::shell(command),
            terminal_callbacks(ctx.terminals.clone(), &terminal_id),
            context,
        )
        .await;
    let mut handle = match started {
        Ok(handle) => handle,
        Err(e) => {
            ctx.terminals.append_error(&terminal_id, &e.to_string());
            return Err(e.into());
        }
    };

    info!(scenario_id = %scenario_id, terminal_id = %terminal_id, "Terminal command started");
    let terminals = ctx.terminals.clone();
    tokio::spawn(async move {
        let outcome = handle.wait().await;
        let status = match (&outcome.cause, outcome.success) {
            (Some(TerminationCause::Stopped), _) => RunStatus::Stopped,
            (_, true) => RunStatus::Completed,
            (_, false) => RunStatus::Failed,
        };
        terminals.update_status(&terminal_id, status);
        debug!(terminal_id = %terminal_id, outcome = %outcome.describe(), "Terminal command finished");
    });
    Ok(())
}

/// Start a catalog tool or command line whose output goes straight to the sender.
///
/// `tagged` carries the `(tabId, outputId)` pair of an `execute-multi` request.
async fn execute(
    ctx: &DispatchContext<'_>,
    process_id: &str,
    command: &str,
    parameters: &HashMap<String, Value>,
    target: Option<&Target>,
    scenario_id: Option<String>,
    tagged: Option<(String, String)>,
) -> Result<()> {
    let (spec, container_id) = resolve(ctx.catalog, command, parameters, target)?;
    let tx = ctx
        .hub
        .sender(ctx.conn_id)
        .await
        .ok_or_else(|| Error::Internal("connection is not registered".to_string()))?;

    let (tab_id, output_id) = match tagged {
        Some((tab_id, output_id)) => (tab_id, Some(output_id)),
        None => (process_id.to_string(), None),
    };
    let context = ProcessContext {
        scenario_id,
        attack_id: None,
        tool: ctx.catalog.get(command).map(|t| t.name.clone()),
        container_id,
    };
    ctx.supervisor
        .start(process_id, spec, client_callbacks(tx, tab_id, output_id), context)
        .await?;
    info!(process_id = %process_id, command = %command, "Execute started");
    Ok(())
}

/// Build the process for `command`: a single-stage catalog tool, or a shell line.
fn resolve(
    catalog: &ToolCatalog,
    command: &str,
    parameters: &HashMap<String, Value>,
    target: Option<&Target>,
) -> Result<(ProcessSpec, Option<String>)> {
    let Some(tool) = catalog.get(command) else {
        return Ok((ProcessSpec::shell(command), None));
    };
    if tool.is_multi_stage() {
        return Err(Error::InvalidState(format!(
            "tool {} needs setup steps and only runs inside a scenario",
            tool.name
        )));
    }

    let mut vars = target.map(Target::template_vars).unwrap_or_default();
    vars.extend(string_parameters(parameters));
    let invocation = catalog.invocation(command, &vars)?;
    Ok((invocation.main, invocation.container))
}

/// Forward process output to one connection as `output`/`error`/`notification` frames
fn client_callbacks(
    tx: mpsc::Sender<Outbound>,
    tab_id: String,
    output_id: Option<String>,
) -> ProcessCallbacks {
    let (out_tx, out_tab) = (tx.clone(), tab_id.clone());
    let (err_tx, err_tab) = (tx.clone(), tab_id.clone());
    let (note_tx, note_tab) = (tx, tab_id);

    ProcessCallbacks::new(
        move |line| {
            let frame = ServerFrame::Output {
                payload: line.to_string(),
                tab_id: out_tab.clone(),
                output_id: output_id.clone(),
            };
            let _ = out_tx.try_send(Outbound::Text(frame.to_json()));
        },
        move |line| {
            let frame = ServerFrame::Error {
                payload: line.to_string(),
                tab_id: Some(err_tab.clone()),
                code: None,
            };
            let _ = err_tx.try_send(Outbound::Text(frame.to_json()));
        },
        move |notification: Notification| {
            let frame = ServerFrame::Notification {
                level: notification.level,
                message: notification.message,
                tab_id: note_tab.clone(),
            };
            let _ = note_tx.try_send(Outbound::Text(frame.to_json()));
        },
    )
}
