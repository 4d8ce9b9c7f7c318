//! Things: devices owning a collection of observable states
//!
//! A [`Thing`] is built once, explicitly, through [`ThingBuilder`] - every
//! declared state is registered at construction and never after. The glue
//! to the outside world is [`Thing::bind_to`]: it wires push rules (state
//! event -> `binding.push`) and inbound subscriptions
//! (`(thing_id, state_name)` -> state) for a chosen set of states.

mod presets;
mod thing;

pub use presets::{dimmer, number, switch, temperature, text};
pub use thing::{BindOptions, SharedThing, Thing, ThingBuilder, ThingError};
