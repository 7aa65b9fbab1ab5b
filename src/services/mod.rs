//! Business logic services

pub mod adherence;
pub mod avl_archiver;
pub mod avl_processor;
pub mod block_assigner;
pub mod event_sink;
pub mod geo;
pub mod match_processor;
pub mod spatial_matcher;
pub mod temporal_matcher;
pub mod timeout;
pub mod travel_times;
pub mod vehicle_cache;
pub mod vehicle_store;
