//! linkdave-controller – die Controller-Seite von LinkDave
//!
//! Ein Bot-Prozess haelt einen `ControllerManager` mit mehreren Nodes.
//! Pro Guild existiert genau ein `LogicalPlayer`, gebunden an den Node mit
//! den wenigsten Playern. Der Host leitet die Gateway-Pakete der
//! Chat-Plattform via `handle_raw` durch; sobald beide Zugangsdaten-
//! Haelften da sind, geht ein VoiceUpdate an den Node.
//!
//! Draint ein Node, wandern seine Player ueber das Migrationsprotokoll
//! (PlayerMigrate → MigrateReady → VoiceUpdate + Play auf dem Ziel) auf
//! den naechstbesten Node – ohne Disconnect an den alten Node.

pub mod error;
pub mod gateway;
pub mod manager;
pub mod node_client;
pub mod player;

pub use error::{ControllerFehler, ControllerResult};
pub use gateway::{GatewaySender, RohPaket};
pub use manager::{ControllerEreignis, ControllerManager};
pub use node_client::{NodeClient, NodeEreignis, NodeOptionen, NodeZustand};
pub use player::LogicalPlayer;
