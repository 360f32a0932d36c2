use color_eyre::Result;
use tokio::task::JoinHandle;

pub mod channel;
pub mod collaborators;
pub mod engine_daemon;
pub mod evaluator;
pub mod policy;
pub mod restriction;

pub(crate) type Tasks = Vec<JoinHandle<Result<()>>>;
