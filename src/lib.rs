pub mod board;
pub mod config;
pub mod distances;
pub mod eta;
pub mod geo;
pub mod hub;
pub mod journal;
pub mod model;
pub mod network;
pub mod query;
pub mod routing;
pub mod seats;
pub mod tracker;
pub mod tracking;
