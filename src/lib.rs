//! EnvX analysis job client
//!
//! This library drives the environmental image-analysis backend from the
//! client side: it uploads images, requests analyses, polls jobs until they
//! finish and turns their typed results into display-ready visualizations.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use error::ClientError;
