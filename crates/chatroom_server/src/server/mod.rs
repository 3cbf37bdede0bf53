#![forbid(unsafe_code)]

pub mod audit;
pub mod auth;
pub mod bridge;
pub mod commands;
pub mod connection;
pub mod directory;
pub mod embeds;
pub mod health;
pub mod history;
pub mod ledger;
pub mod poll;
pub mod registry;
pub mod room;
pub mod rooms;




#[cfg(test)]
mod connection_tests;

#[cfg(test)]
mod history_tests;

#[cfg(test)]
mod ledger_tests;




#[cfg(test)]
mod rooms_tests;
