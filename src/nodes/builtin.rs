/// Built-in node types
///
/// - `flowgate.manualTrigger`: started by hand only; never makes a workflow activatable
/// - `flowgate.webhook`: one HTTP endpoint from its `path`/`httpMethod` parameters
/// - `flowgate.interval`: emits an empty item every `interval` `unit`s
/// - `flowgate.executeWorkflowTrigger`: started by other workflows, not by activation

use crate::{
    errors::CloseError,
    nodes::{NodeKind, NodeTypeDescriptor, TriggerNode, TriggerResponse, WebhookNode},
    runtime::context::TriggerContext,
    webhooks::WebhookDescription,
    workflow::{node_types::NodeTypes, types::Node},
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const MANUAL_TRIGGER: &str = "flowgate.manualTrigger";
pub const WEBHOOK: &str = "flowgate.webhook";
pub const INTERVAL: &str = "flowgate.interval";
pub const EXECUTE_WORKFLOW_TRIGGER: &str = "flowgate.executeWorkflowTrigger";

/// Register every built-in node type (version 1)
pub fn register_builtin_nodes(node_types: &NodeTypes) {
    node_types.register(NodeTypeDescriptor::new(
        MANUAL_TRIGGER,
        1,
        NodeKind::Trigger(Arc::new(ManualTrigger)),
    ));
    node_types.register(NodeTypeDescriptor::new(WEBHOOK, 1, NodeKind::Webhook(Arc::new(Webhook))));
    node_types.register(NodeTypeDescriptor::new(
        INTERVAL,
        1,
        NodeKind::Trigger(Arc::new(IntervalTrigger)),
    ));
    node_types.register(NodeTypeDescriptor::new(EXECUTE_WORKFLOW_TRIGGER, 1, NodeKind::Action));
    tracing::debug!("📝 Registered built-in node types");
}

/// Does nothing when activated
pub struct ManualTrigger;

#[async_trait]
impl TriggerNode for ManualTrigger {
    async fn trigger(&self, _ctx: TriggerContext) -> anyhow::Result<TriggerResponse> {
        Ok(TriggerResponse::without_close())
    }
}

pub struct Webhook;

impl WebhookNode for Webhook {
    fn webhooks(&self, node: &Node) -> Vec<WebhookDescription> {
        let method = node
            .parameter("httpMethod")
            .and_then(Value::as_str)
            .unwrap_or("GET");
        let path = node.parameter("path").and_then(Value::as_str).unwrap_or_default();

        let description = WebhookDescription::new(method, path);
        if node.parameter("isFullPath").and_then(Value::as_bool).unwrap_or(false) {
            vec![description.full_path()]
        } else {
            vec![description]
        }
    }
}

pub struct IntervalTrigger;

impl IntervalTrigger {
    fn period(node: &Node) -> anyhow::Result<Duration> {
        let interval = node.parameter("interval").and_then(Value::as_u64).unwrap_or(1);
        if interval == 0 {
            anyhow::bail!("The interval has to be set to at least 1 or higher!");
        }

        let unit_secs = match node.parameter("unit").and_then(Value::as_str).unwrap_or("seconds") {
            "seconds" => 1,
            "minutes" => 60,
            "hours" => 60 * 60,
            other => anyhow::bail!("Unknown interval unit \"{}\"", other),
        };

        Ok(Duration::from_secs(interval.saturating_mul(unit_secs)))
    }
}

#[async_trait]
impl TriggerNode for IntervalTrigger {
    async fn trigger(&self, ctx: TriggerContext) -> anyhow::Result<TriggerResponse> {
        let period = Self::period(ctx.node())?;
        let token = CancellationToken::new();

        let stopped = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => {
                        if !ctx.emit(vec![json!({})]) {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("⏹️ Interval trigger '{}' of workflow {} stopped", ctx.node().name, ctx.workflow_id());
        });

        Ok(TriggerResponse::with_close(move || async move {
            token.cancel();
            Ok::<(), CloseError>(())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        runtime::context::{emit_channels, ContextFactory},
        workflow::types::{ActivationMode, ExecutionMode, WorkflowRecord, WorkflowSettings},
    };

    #[test]
    fn webhook_reads_method_path_and_full_path_flag() {
        let node = Node::new("Hook", WEBHOOK).with_parameters(json!({ "path": "orders", "httpMethod": "post" }));
        assert_eq!(Webhook.webhooks(&node), vec![WebhookDescription::new("POST", "orders")]);

        let node = Node::new("Hook", WEBHOOK).with_parameters(json!({ "path": "/api/v1/orders", "isFullPath": true }));
        let description = &Webhook.webhooks(&node)[0];
        assert_eq!(description.http_method, "GET");
        assert!(description.is_full_path);
    }

    #[test]
    fn builtins_are_registered_with_their_kinds() {
        let node_types = NodeTypes::new();
        register_builtin_nodes(&node_types);

        assert_eq!(node_types.len(), 4);
        assert_eq!(node_types.kind_of(MANUAL_TRIGGER, 1).map(|k| k.label()), Some("trigger"));
        assert_eq!(node_types.kind_of(WEBHOOK, 1).map(|k| k.label()), Some("webhook"));
        assert_eq!(
            node_types.kind_of(EXECUTE_WORKFLOW_TRIGGER, 1).map(|k| k.label()),
            Some("action")
        );
    }

    #[test]
    fn zero_interval_is_rejected() {
        let node = Node::new("Every", INTERVAL).with_parameters(json!({ "interval": 0 }));
        assert!(IntervalTrigger::period(&node).is_err());

        let node = Node::new("Every", INTERVAL).with_parameters(json!({ "interval": 2, "unit": "minutes" }));
        assert_eq!(IntervalTrigger::period(&node).unwrap(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_emits_until_closed() {
        let node = Node::new("Every", INTERVAL).with_parameters(json!({ "interval": 5 }));
        let workflow = Arc::new(WorkflowRecord {
            id: "wf-1".into(),
            name: "Ticker".into(),
            active: true,
            nodes: vec![node.clone()],
            connections: vec![],
            settings: WorkflowSettings::default(),
        });
        let (emitter, mut receivers) = emit_channels();
        let ctx = ContextFactory::new(workflow, emitter).trigger_context(&node, ExecutionMode::Trigger, ActivationMode::Init);

        let response = IntervalTrigger.trigger(ctx).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(receivers.data.recv().await.unwrap().node, "Every");
        assert_eq!(receivers.data.recv().await.unwrap().node, "Every");

        (response.close.unwrap())().await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(receivers.data.try_recv().is_err());
    }
}
