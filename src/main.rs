use {
  clap::Parser,
  meridian::{
    cli::CliOpts,
    clock::{Clock, SystemClock},
    consensus::{
      ConsensusMode,
      EraSupervisor,
      ExecutorEvent,
      ForkChoice,
      Message,
      MessageExecutor,
      MessageProducer,
      NullExecutionEngine,
      ProducerPermits,
      Validator,
    },
    gossip::{Gossip, LoopbackGossip},
    primitives::ToBase58String,
    storage::{BlockStorage, SledBlockStorage},
  },
  std::sync::Arc,
  tracing::{debug, info, warn},
  tracing_subscriber::EnvFilter,
};

#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn init_tracing(opts: &CliOpts) {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(opts.log_level().to_string()));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
  let opts = CliOpts::parse();
  init_tracing(&opts);

  info!("starting meridian validator node");
  info!(version = env!("CARGO_PKG_VERSION"));

  let genesis = opts.genesis()?;
  info!(chain_id = %genesis.chain_id, "loaded genesis");

  let keypair = opts.validator_keypair()?;
  match &keypair {
    Some(kp) => info!(validator = %kp.public(), "running as a producing validator"),
    None => info!("no validator key configured, running listen-only"),
  }

  std::fs::create_dir_all(&opts.data_dir)?;
  let storage = SledBlockStorage::open(&opts.data_dir)?;

  let validators: Vec<Validator> = genesis
    .validators
    .iter()
    .map(|v| Validator::new(v.pubkey, v.stake))
    .collect();

  let supervisor = match genesis.consensus_mode {
    ConsensusMode::Classical => EraSupervisor::classical(validators.clone()),
    ConsensusMode::Highway => {
      let params = genesis
        .highway
        .clone()
        .ok_or_else(|| anyhow::anyhow!("highway mode requires highway genesis params"))?;
      EraSupervisor::highway(params, validators.clone())
    }
  };

  let mut executor = MessageExecutor::new(
    genesis.relative_fault_tolerance,
    Box::new(NullExecutionEngine),
    std::time::Duration::from_secs(30),
  );
  if let Some(kp) = &keypair {
    executor = executor.with_local_validator(kp.public());
  }
  let executor = Arc::new(executor);

  if let Some(last_finalized) = storage.last_finalized()? {
    info!(hash = %last_finalized.to_b58(), "resuming from persisted last-finalized block");
  }
  for message in storage.all()? {
    executor.dag().insert(message);
  }

  let (gossip, mut inbound) = LoopbackGossip::new(1024);
  let gossip: Arc<dyn Gossip> = Arc::new(gossip);

  let producer = keypair.as_ref().map(|_| MessageProducer::new(ProducerPermits::new()));
  let clock = SystemClock;

  // Classical mode has no round-exponent timing of its own; a flat
  // interval stands in for "whenever this validator feels like voting".
  // Highway mode derives the real round length (in ticks/ms) from the
  // era's round exponent, so round boundaries line up across validators
  // without any network round to agree on them.
  let round_length = match genesis.consensus_mode {
    ConsensusMode::Classical => std::time::Duration::from_millis(2_000),
    ConsensusMode::Highway => {
      std::time::Duration::from_millis(supervisor.round_length_ticks())
    }
  };
  let era_start_tick = genesis.genesis_time.timestamp_millis() as u64;
  let mut round_ticker = tokio::time::interval(round_length);

  loop {
    tokio::select! {
      Some(message) = inbound.recv() => {
        handle_inbound(&executor, &storage, message, &validators).await;
      }

      _ = round_ticker.tick() => {
        let now = clock.now().timestamp_millis() as u64;
        let round_id = match genesis.consensus_mode {
          ConsensusMode::Classical => now / round_length.as_millis().max(1) as u64,
          ConsensusMode::Highway => supervisor.round_id_at(era_start_tick, now),
        };
        if let (Some(kp), Some(producer)) = (&keypair, &producer) {
          let era = supervisor.current_era();
          let is_leader = supervisor.is_leader_round(0, round_id, &kp.public());
          if is_leader || genesis.consensus_mode == ConsensusMode::Classical {
            let fork_choice = ForkChoice::new(&validators);
            let ballot = producer
              .ballot(executor.dag(), &fork_choice, &validators, kp, era.id, round_id, now as i64)
              .await;
            debug!(round_id, is_leader, "produced lambda/vote message");
            if let Err(e) = gossip.broadcast(ballot.clone()).await {
              warn!(error = %e, "failed to broadcast own ballot");
            }
            handle_inbound(&executor, &storage, ballot, &validators).await;
          } else if genesis.consensus_mode == ConsensusMode::Highway {
            let (omega_start, _omega_end) = supervisor.omega_window(era_start_tick, round_id);
            let delay = omega_start.saturating_sub(now);
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            let fork_choice = ForkChoice::new(&validators);
            let omega_now = clock.now().timestamp_millis();
            let ballot = producer
              .ballot(executor.dag(), &fork_choice, &validators, kp, era.id, round_id, omega_now)
              .await;
            debug!(round_id, "produced omega message");
            if let Err(e) = gossip.broadcast(ballot.clone()).await {
              warn!(error = %e, "failed to broadcast own omega ballot");
            }
            handle_inbound(&executor, &storage, ballot, &validators).await;
          }
        }
      }
    }
  }
}

async fn handle_inbound(
  executor: &MessageExecutor,
  storage: &SledBlockStorage,
  message: Message,
  validators: &[Validator],
) {
  match executor.execute(message, validators).await {
    Ok(events) => {
      for event in events {
        match event {
          ExecutorEvent::Inserted(hash) => {
            if let Some(message) = executor.dag().lookup(&hash) {
              if let Err(e) = storage.put(&message) {
                warn!(error = %e, "failed to persist message");
              }
            }
          }
          ExecutorEvent::Finalized { block, fault_tolerance } => {
            info!(block = %block.to_b58(), fault_tolerance, "block finalized");
            if let Err(e) = storage.set_last_finalized(block) {
              warn!(error = %e, "failed to persist last-finalized pointer");
            }
          }
          ExecutorEvent::IndirectlyFinalized(hashes) => {
            info!(count = hashes.len(), "indirectly finalized ancestors");
          }
          ExecutorEvent::MarkedOrphan(hashes) => {
            info!(count = hashes.len(), "branches marked orphaned");
          }
          ExecutorEvent::Equivocation { validator, prior, new } => {
            warn!(validator = %validator, %prior, %new, "equivocation detected");
          }
          ExecutorEvent::SelfEquivocation { prior, new } => {
            tracing::error!(%prior, %new, "local validator key signed two equivocating messages, terminating");
            std::process::exit(1);
          }
          ExecutorEvent::Orphaned(hash) => {
            debug!(hash = %hash.to_b58(), "message parked pending missing dependencies");
          }
        }
      }
    }
    Err(e) => warn!(error = %e, "failed to process message"),
  }
}
