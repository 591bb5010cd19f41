//! Instrument Layer
//!
//! Everything between the sweep procedure and the wire:
//!
//! - `transport` - the `ScpiTransport` trait (write / query over one address)
//! - `reply` - parsing of numeric and error-queue replies
//! - `property` - validated, declarative property descriptors
//! - `buffer` - trace-buffer capability shared by both instruments
//! - `nanovoltmeter` / `current_source` - device façades
//! - `mock` - in-memory instrument for tests and simulation
//! - `visa` - real instruments (feature `instrument_visa`)

pub mod buffer;
pub mod current_source;
pub mod mock;
pub mod nanovoltmeter;
pub mod property;
pub mod reply;
pub mod transport;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use buffer::TraceBuffer;
pub use current_source::{CurrentSource, ErrorQueueEntry};
pub use mock::MockScpiTransport;
pub use nanovoltmeter::{MeterState, Nanovoltmeter};
pub use property::{Domain, PropertyDescriptor, PropertyValue};
pub use transport::ScpiTransport;
#[cfg(feature = "instrument_visa")]
pub use visa::VisaTransport;
