//! Headless simulation driver: several sync engines sharing one
//! in-process hub, issuing concurrent creates and drags, then verifying
//! that every client converged on the hub's authoritative object set.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use sync::{
    CanvasObject, ConnectionStatus, EngineConfig, EngineHandle, Identity, MemoryBackend, spawn,
};
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum SimError {
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("clients diverged after settling: {0}")]
    Diverged(String),
}

#[derive(Parser, Debug)]
#[command(name = "sync-sim", about = "Multi-client convergence simulation for the sync engine")]
struct Args {
    /// Number of concurrent clients.
    #[arg(long, default_value_t = 3)]
    clients: usize,

    /// Objects created per client.
    #[arg(long, default_value_t = 5)]
    creates: usize,

    /// Drag rounds; every client drags one object per round.
    #[arg(long, default_value_t = 10)]
    drags: usize,

    /// Workspace id to join.
    #[arg(long, env = "SYNC_SIM_WORKSPACE", default_value = "sim")]
    workspace: String,
}

#[tokio::main]
async fn main() -> Result<(), SimError> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    if args.clients == 0 {
        info!("no clients requested; nothing to simulate");
        return Ok(());
    }

    let backend = MemoryBackend::new();
    let mut handles = Vec::new();
    for i in 0..args.clients {
        handles.push(spawn(EngineConfig {
            workspace_id: args.workspace.clone(),
            identity: Some(Identity::new(format!("user-{i}"), format!("Agent {i}"))),
            backend: Arc::new(backend.clone()),
        }));
    }

    for handle in &handles {
        wait_subscribed(handle).await?;
    }
    info!(clients = args.clients, workspace = %args.workspace, "all clients subscribed");

    // Pre-roll the randomness so no generator lives across an await.
    let mut rng = rand::rng();
    let create_positions: Vec<(f64, f64)> = (0..args.clients * args.creates)
        .map(|_| {
            // Deliberately spills out of bounds to exercise clamping.
            (rng.random_range(-200.0..3_200.0), rng.random_range(-200.0..3_200.0))
        })
        .collect();
    let drag_plan: Vec<(usize, f64, f64)> = (0..args.drags * args.clients)
        .map(|_| {
            (
                rng.random_range(0..usize::MAX),
                rng.random_range(-100.0..3_100.0),
                rng.random_range(-100.0..3_100.0),
            )
        })
        .collect();

    for (slot, (x, y)) in create_positions.into_iter().enumerate() {
        handles[slot % handles.len()].create_at(x, y).await;
    }

    let expected = args.clients * args.creates;
    wait_until(Duration::from_secs(10), "creates to land", || {
        backend.authoritative(&args.workspace).len() == expected
    })
    .await?;
    info!(objects = expected, "all creates durable");

    // Concurrent drags: every client grabs an object from its own view
    // each round, moves it through an intermediate point, and commits.
    for (round, chunk) in drag_plan.chunks(handles.len()).enumerate() {
        for (handle, &(pick, x, y)) in handles.iter().zip(chunk) {
            let objects = handle.subscribe_to_objects().borrow().clone();
            if objects.is_empty() {
                continue;
            }
            let target = objects[pick % objects.len()].id.clone();
            handle.drag_to(target.clone(), x / 2.0, y / 2.0).await;
            handle.drag_end(target, x, y).await;
        }
        // Distinct wall-clock timestamps between rounds keep the
        // last-writer-wins outcome well defined.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if (round + 1) % 5 == 0 {
            info!(round = round + 1, "drag rounds issued");
        }
    }

    // Settle: every client's reconciled view must match the hub exactly.
    let converged = wait_until(Duration::from_secs(10), "convergence", || {
        let authoritative: Vec<CanvasObject> = backend
            .authoritative(&args.workspace)
            .into_iter()
            .map(CanvasObject::from)
            .collect();
        handles
            .iter()
            .all(|handle| *handle.subscribe_to_objects().borrow() == authoritative)
    })
    .await;

    if converged.is_err() {
        let counts: Vec<usize> = handles
            .iter()
            .map(|handle| handle.subscribe_to_objects().borrow().len())
            .collect();
        return Err(SimError::Diverged(format!(
            "hub has {} objects, clients see {counts:?}",
            backend.authoritative(&args.workspace).len(),
        )));
    }

    info!(
        objects = expected,
        clients = args.clients,
        drags = args.drags,
        "converged: every client matches the authoritative set"
    );

    for handle in handles {
        handle.shutdown().await;
    }
    Ok(())
}

async fn wait_subscribed(handle: &EngineHandle) -> Result<(), SimError> {
    let status = handle.subscribe_to_status();
    wait_until(Duration::from_secs(5), "subscription", || {
        *status.borrow() == ConnectionStatus::Subscribed
    })
    .await
}

async fn wait_until<F>(limit: Duration, what: &'static str, mut pred: F) -> Result<(), SimError>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if pred() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    Err(SimError::Timeout(what))
}
