pub mod error;
pub mod sql;
pub mod config;
pub mod db;

pub mod lock;
pub mod store;
pub mod external;
pub mod bus;
pub mod state;

pub mod hierarchy;
pub mod collection;
pub mod tags;
pub mod versioned;
pub mod reconcile;
pub mod saga;

pub mod net;
pub mod jobs;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod scenarios;
