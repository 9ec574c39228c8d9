pub mod client;

pub use client::GammaClient;
