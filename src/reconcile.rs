//! handlers that restore derived state after asynchronous changes. every
//! handler re-reads current state so replays are harmless

pub mod change;
pub mod gallery;
pub mod size;
pub mod thumbnail;
