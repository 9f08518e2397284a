// MIDI layer - message types, input filtering and output port bindings

pub mod event;
pub mod filter;
pub mod ports;

pub use event::MidiMessage;
pub use filter::InputFilter;
pub use ports::{OutputBinding, PortBindings};
