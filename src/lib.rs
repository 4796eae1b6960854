pub mod api;
pub mod checker;
pub mod cli;
pub mod commands;
pub mod config;
pub mod controllers;
