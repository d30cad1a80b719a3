pub mod advisor;
pub mod backend;
pub mod batching;
pub mod chart;
pub mod config;
pub mod counters;
pub mod db;
pub mod demo;
pub mod errors;
pub mod ingest;
pub mod live;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod offline_advice;
pub mod requests;
pub mod rest;
pub mod status;
pub mod storage;
pub mod tutorial;
pub mod validate;
