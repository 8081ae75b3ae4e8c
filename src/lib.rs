//! MillionGrid: a 1000x1000 grid of cells that buyers claim and paint.
//!
//! The server side is [`store`] + [`claim`] behind [`api`] / [`server`];
//! the client side is [`selection`] -> [`raster`] -> [`checkout`], with
//! [`render`] for drawing the grid.

pub mod api;
pub mod checkout;
pub mod claim;
pub mod cli;
pub mod color;
pub mod config;
pub mod grid;
pub mod logger;
pub mod raster;
pub mod render;
pub mod selection;
pub mod server;
pub mod store;
