//! Zamfir, V., et al. "Introducing the minimal CBC Casper family of
//! consensus protocols." Block-DAG implementation of Latest-Message-Driven
//! CBC Casper with GHOST fork choice, supporting both a free-running
//! classical mode and an era-partitioned highway mode.

mod dag;
mod equivocation;
mod era;
mod era_supervisor;
mod executor;
mod finality;
mod fork_choice;
mod genesis;
mod message;
mod orphans;
mod permit;
mod producer;
mod schedule;
mod swimlane;
mod validator;

pub use {
  dag::{DagView, InMemoryDag, InsertOutcome},
  equivocation::{EquivocationDetector, EquivocationRecord},
  era::{Era, EraId, PendingCandidate},
  era_supervisor::EraSupervisor,
  executor::{ExecutionEngine, ExecutorEvent, MessageExecutor, NullExecutionEngine},
  finality::{FinalityDetector, FinalityOutcome, VotingMatrix},
  fork_choice::ForkChoice,
  genesis::{ConsensusMode, Genesis, HighwayParams},
  message::{
    BlockBody,
    Justification,
    Message,
    MessageBody,
    MessageError,
    MessageHeader,
  },
  orphans::Orphans,
  permit::{MessageAddingPermit, OwnedProducerPermit, ProducerPermits},
  producer::MessageProducer,
  schedule::ValidatorSchedule,
  swimlane::SwimlaneIndex,
  validator::Validator,
};
