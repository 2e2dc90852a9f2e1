use crate::ambient::AmbientReading;
use anyhow::Result;
use async_trait::async_trait;
use vole_core::{StateMachine, TrialEvents};

/// The device controller seam.
///
/// Implementors:
/// - `SimController`: software execution against a virtual clock
/// - a serial-port implementation wrapping the vendor SDK (out of tree)
#[async_trait]
pub trait Controller: Send + Sync {
    /// Preload a serial message on a module port under `index`, so state
    /// machine outputs can reference it as `Serial { port, message: index }`.
    async fn load_serial_message(&mut self, port: u8, index: u8, payload: Vec<u8>) -> Result<()>;

    /// Validate and upload a state machine. Replaces any previously sent one.
    async fn send_state_machine(&mut self, sma: &StateMachine) -> Result<()>;

    /// Execute the uploaded machine; resolves when it reaches exit and
    /// returns the event log.
    async fn run_state_machine(&mut self) -> Result<TrialEvents>;

    /// One reading from the rig's ambient sensor board.
    async fn read_ambient(&mut self) -> Result<AmbientReading>;

    async fn close(&mut self) -> Result<()>;

    /// Controller type name (for logs).
    fn name(&self) -> &str;
}
