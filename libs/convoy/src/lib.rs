//! Live position tracking for fleets of vehicles and drivers on a map surface.

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod geo;
pub mod geolocation;
pub mod memory;
pub mod path;
pub mod sim;
pub mod surface;

pub use controller::*;
pub use error::*;
pub use geo::*;
