pub mod converters;
pub mod dispatcher;
pub mod executor;
pub mod extraction;
pub mod formats;
pub mod i3s_resolver;
pub mod ingest;
pub mod job_store;
pub mod slpk;
pub mod storage;
