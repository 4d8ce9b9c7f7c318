//! Ready-made thing shapes for common device classes

use smarthome_core::Converter;

use crate::{SharedThing, Thing};

/// A switchable device with a single boolean `is_on` state
pub fn switch(name: impl Into<String>) -> SharedThing {
    Thing::builder("switch", name)
        .state("is_on", Converter::Bool, false)
        .build()
}

/// A dimmable light with an integer `dim_level` state
pub fn dimmer(name: impl Into<String>) -> SharedThing {
    Thing::builder("dimmer", name)
        .state("dim_level", Converter::Int, 0)
        .build()
}

/// A generic numeric reading
pub fn number(name: impl Into<String>) -> SharedThing {
    Thing::builder("number", name)
        .state("value", Converter::Float, 0.0)
        .build()
}

/// A free-form text holder
pub fn text(name: impl Into<String>) -> SharedThing {
    Thing::builder("string", name)
        .state("value", Converter::Str, "")
        .build()
}

/// A temperature sensor reading
pub fn temperature(name: impl Into<String>) -> SharedThing {
    Thing::builder("temp", name)
        .state("value", Converter::Float, 0.0)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use smarthome_core::Value;

    #[test]
    fn test_preset_shapes() {
        let lamp = switch("lamp");
        assert_eq!(lamp.unique_id(), "switch.lamp");
        assert_eq!(lamp.state("is_on").unwrap().value(), Value::Bool(false));

        let hall = dimmer("hall");
        assert_eq!(hall.unique_id(), "dimmer.hall");
        assert_eq!(hall.state("dim_level").unwrap().value(), Value::Int(0));

        let outdoor = temperature("outdoor");
        assert_eq!(outdoor.unique_id(), "temp.outdoor");
        assert_eq!(outdoor.state("value").unwrap().value(), Value::Float(0.0));

        let note = text("note");
        assert_eq!(note.unique_id(), "string.note");
        assert_eq!(
            note.state("value").unwrap().value(),
            Value::Str(String::new())
        );
    }
}
