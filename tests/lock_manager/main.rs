mod config;
mod scenarios;
mod support;
