//! MindBot core library — dedup store, recognition pipeline, content
//! extraction, agent backend client, card delivery, and the stream intake
//! controller used by the CLI.

pub mod backend;
pub mod channels;
pub mod config;
pub mod dedup;
pub mod delivery;
pub mod extract;
pub mod ingress;
pub mod intake;
pub mod recognition;
pub mod routing;
