pub mod api;
pub mod auth;
pub mod dispatcher;
pub mod poller;
pub mod results;
pub mod session;
pub mod submitter;
pub mod workflow;
