use clap::Parser;
use synapse_node::{config, host, identity, network, orchestrator};
use synapse_protocol::Agent;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "synapse_node=info,libp2p=warn".parse().unwrap()),
        )
        .init();

    let cfg = config::Config::parse();
    let identity = identity::NodeIdentity::load_or_generate(&cfg.keypair_path)?;

    let agent = Agent::from_signing_key(
        cfg.agent_id.clone(),
        cfg.capabilities.clone(),
        identity.signing_key.clone(),
    );

    tracing::info!(
        agent_id = %agent.id,
        did = %agent.did,
        public_key = %hex::encode(agent.public_key()),
        capabilities = ?agent.capabilities,
        "synapse node starting",
    );

    let swarm = network::build_swarm(identity.libp2p_keypair.clone(), cfg.listen_addr.clone())?;
    let node = host::AgentHost::spawn(agent, cfg.host_config(), swarm)?;

    // Log the full multiaddr so operators can pass it to --peer elsewhere.
    let addr = node.wait_listen_addr().await?;
    tracing::info!(%addr, "synapse node reachable");

    let (evict_cancel, evict_rx) = oneshot::channel();
    node.discovery().start_eviction_loop(cfg.eviction_interval(), evict_rx);

    // Connect and handshake with every configured peer.
    for peer_addr in &cfg.peer {
        match node.connect(peer_addr.clone()).await {
            Ok(peer) => match node.handshake(peer).await {
                Ok(result) => tracing::info!(
                    peer = %peer,
                    agent = %result.peer_agent_id,
                    capabilities = ?result.peer_capabilities,
                    "peer handshake complete",
                ),
                Err(e) => tracing::warn!(peer = %peer, error = %e, "handshake failed"),
            },
            Err(e) => tracing::warn!(addr = %peer_addr, error = %e, "dial failed"),
        }
    }

    node.announce_capabilities();

    // When workflow steps were given, dispatch them across the freshly
    // handshaken mesh and report the outcome.
    if !cfg.workflow_step.is_empty() {
        let steps = cfg
            .workflow_step
            .iter()
            .enumerate()
            .map(|(i, capability)| orchestrator::WorkflowStep {
                id: format!("step-{}", i + 1),
                capability: capability.clone(),
                intent_vector: Vec::new(),
                payload: String::new(),
            })
            .collect();

        let orch = orchestrator::WorkflowOrchestrator::new(node.clone(), cfg.step_timeout());
        let (results, err) = orch.run_workflow("startup-workflow", steps).await;
        for r in &results {
            tracing::info!(
                step = %r.step_id,
                agent = %r.agent_id,
                accepted = r.accepted,
                reason = %r.reason,
                "workflow step result",
            );
        }
        if let Some(e) = err {
            tracing::warn!(error = %e, "workflow finished with failures");
        }
    }

    let mut announce_timer = tokio::time::interval(cfg.announce_interval());
    loop {
        tokio::select! {
            _ = announce_timer.tick() => {
                node.announce_capabilities();
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                let _ = evict_cancel.send(());
                return Ok(());
            }
        }
    }
}
