use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crate::error::{CodestreamError, Result};

// A.6.1 Table A.16 - Progression order for the SGcod, SPcoc, and Ppoc parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgressionOrder {
    // 0000 0000 Layer-resolution level-component-position progression
    Lrcp,

    // 0000 0001 Resolution level-layer-component-position progression
    Rlcp,

    // 0000 0010 Resolution level-position-component-layer progression
    Rpcl,

    // 0000 0011 Position-component-resolution level-layer progression
    Pcrl,

    // 0000 0100 Component-position-resolution level-layer progression
    Cprl,
}

impl ProgressionOrder {
    pub const ALL: [ProgressionOrder; 5] = [
        ProgressionOrder::Lrcp,
        ProgressionOrder::Rlcp,
        ProgressionOrder::Rpcl,
        ProgressionOrder::Pcrl,
        ProgressionOrder::Cprl,
    ];

    /// Decode the progression order byte. All other values are reserved and
    /// rejected.
    pub fn new(value: u8) -> Result<ProgressionOrder> {
        match value {
            0b0000_0000 => Ok(ProgressionOrder::Lrcp),
            0b0000_0001 => Ok(ProgressionOrder::Rlcp),
            0b0000_0010 => Ok(ProgressionOrder::Rpcl),
            0b0000_0011 => Ok(ProgressionOrder::Pcrl),
            0b0000_0100 => Ok(ProgressionOrder::Cprl),
            _ => Err(CodestreamError::UnknownProgressionOrder { value }),
        }
    }

    pub fn value(&self) -> u8 {
        match self {
            ProgressionOrder::Lrcp => 0,
            ProgressionOrder::Rlcp => 1,
            ProgressionOrder::Rpcl => 2,
            ProgressionOrder::Pcrl => 3,
            ProgressionOrder::Cprl => 4,
        }
    }

    /// Position-driven orders walk precincts by canvas position.
    pub fn is_position_driven(&self) -> bool {
        matches!(
            self,
            ProgressionOrder::Rpcl | ProgressionOrder::Pcrl | ProgressionOrder::Cprl
        )
    }
}

impl fmt::Display for ProgressionOrder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ProgressionOrder::Lrcp => "LRCP",
            ProgressionOrder::Rlcp => "RLCP",
            ProgressionOrder::Rpcl => "RPCL",
            ProgressionOrder::Pcrl => "PCRL",
            ProgressionOrder::Cprl => "CPRL",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ProgressionOrder {
    type Err = CodestreamError;

    fn from_str(s: &str) -> Result<ProgressionOrder> {
        match s.to_ascii_uppercase().as_str() {
            "LRCP" => Ok(ProgressionOrder::Lrcp),
            "RLCP" => Ok(ProgressionOrder::Rlcp),
            "RPCL" => Ok(ProgressionOrder::Rpcl),
            "PCRL" => Ok(ProgressionOrder::Pcrl),
            "CPRL" => Ok(ProgressionOrder::Cprl),
            _ => Err(CodestreamError::InvalidGeometry {
                error: format!("unknown progression order name {:?}", s),
            }),
        }
    }
}

// A.6.6 - Progression order change (POC)
//
// One progression record. Component and resolution ranges are half-open;
// the layer range always starts at zero and ends at LYEpoc.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressionChange {
    // RSpoc: Resolution level index (inclusive) for the start of a progression.
    pub resolution_start: u8,

    // CSpoc: Component index (inclusive) for the start of a progression.
    pub component_start: u16,

    // LYEpoc: Layer index (exclusive) for the end of a progression.
    pub layer_end: u16,

    // REpoc: Resolution level index (exclusive) for the end of a progression.
    pub resolution_end: u8,

    // CEpoc: Component index (exclusive) for the end of a progression.
    //
    // A value of zero is interpreted as 256.
    pub component_end: u16,

    // Ppoc: Progression order.
    pub progression_order: ProgressionOrder,
}

/// Loop bounds a packet iterator runs inside.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressionBounds {
    pub layers: Range<u16>,
    pub resolutions: Range<u8>,
    pub components: Range<u16>,
    pub precinct_end: u64,
}

impl ProgressionBounds {
    pub fn full(no_layers: u16, max_resolutions: u8, no_components: u16) -> ProgressionBounds {
        ProgressionBounds {
            layers: 0..no_layers,
            resolutions: 0..max_resolutions,
            components: 0..no_components,
            precinct_end: u64::MAX,
        }
    }

    /// Bounds of a POC record, clamped to the tile's real extent.
    pub fn from_change(
        change: &ProgressionChange,
        no_layers: u16,
        max_resolutions: u8,
        no_components: u16,
    ) -> ProgressionBounds {
        let clamp16 = |value: u16, max: u16| value.min(max);
        let clamp8 = |value: u8, max: u8| value.min(max);
        ProgressionBounds {
            layers: 0..clamp16(change.layer_end, no_layers),
            resolutions: clamp8(change.resolution_start, max_resolutions)
                ..clamp8(change.resolution_end, max_resolutions),
            components: clamp16(change.component_start, no_components)
                ..clamp16(change.component_end, no_components),
            precinct_end: u64::MAX,
        }
    }
}

/// Dimension along which an encoder splits a tile's packets into tile-parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TilePartDivider {
    Layer,
    Resolution,
    Component,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progression_order_values() {
        for order in ProgressionOrder::ALL.iter() {
            assert_eq!(ProgressionOrder::new(order.value()).unwrap(), *order);
            assert_eq!(order.to_string().parse::<ProgressionOrder>().unwrap(), *order);
        }
        assert!(matches!(
            ProgressionOrder::new(5),
            Err(CodestreamError::UnknownProgressionOrder { value: 5 })
        ));
        assert!(ProgressionOrder::Pcrl.is_position_driven());
        assert!(!ProgressionOrder::Rlcp.is_position_driven());
    }

    #[test]
    fn test_bounds_from_change_are_clamped() {
        let change = ProgressionChange {
            resolution_start: 1,
            component_start: 0,
            layer_end: 9,
            resolution_end: 33,
            component_end: 256,
            progression_order: ProgressionOrder::Rpcl,
        };
        let bounds = ProgressionBounds::from_change(&change, 3, 4, 2);
        assert_eq!(bounds.layers, 0..3);
        assert_eq!(bounds.resolutions, 1..4);
        assert_eq!(bounds.components, 0..2);
    }
}
