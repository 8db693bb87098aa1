// A.2 - Markers in the codestream.
//
// Every marker is two bytes, the first one always 0xFF. Marker segments are
// followed by a 16-bit length that counts itself but not the marker.
pub type MarkerSymbol = [u8; 2];

// Delimiting markers and marker segments
pub const MARKER_SYMBOL_SOC: MarkerSymbol = [255, 79]; // Start of code stream
pub const MARKER_SYMBOL_SOT: MarkerSymbol = [255, 144]; // Start of tile-part
pub const MARKER_SYMBOL_SOD: MarkerSymbol = [255, 147]; // Start of data
pub const MARKER_SYMBOL_EOC: MarkerSymbol = [255, 217]; // End of codestream

// Fixed information marker segments
pub const MARKER_SYMBOL_SIZ: MarkerSymbol = [255, 81]; // Image and tile size

// Functional marker segments
pub const MARKER_SYMBOL_COD: MarkerSymbol = [255, 82]; // Coding style default
pub const MARKER_SYMBOL_COC: MarkerSymbol = [255, 83]; // Coding style component
pub const MARKER_SYMBOL_RGN: MarkerSymbol = [255, 94]; // Region-of-interest
pub const MARKER_SYMBOL_QCD: MarkerSymbol = [255, 92]; // Quantization default
pub const MARKER_SYMBOL_QCC: MarkerSymbol = [255, 93]; // Quantization component
pub const MARKER_SYMBOL_POC: MarkerSymbol = [255, 95]; // Progression order change

// Pointer marker segments
pub const MARKER_SYMBOL_TLM: MarkerSymbol = [255, 85]; // Tile-part lengths
pub const MARKER_SYMBOL_PLM: MarkerSymbol = [255, 87]; // Packet length, main header
pub const MARKER_SYMBOL_PLT: MarkerSymbol = [255, 88]; // Packet length, tile-part header
pub const MARKER_SYMBOL_PPM: MarkerSymbol = [255, 96]; // Packed packet headers, main header
pub const MARKER_SYMBOL_PPT: MarkerSymbol = [255, 97]; // Packed packet headers, tile-part header

// In bit stream markers and marker segments
pub const MARKER_SYMBOL_SOP: MarkerSymbol = [255, 145]; // Start of packet
pub const MARKER_SYMBOL_EPH: MarkerSymbol = [255, 146]; // End of packet header

// Informational marker segments
pub const MARKER_SYMBOL_CRG: MarkerSymbol = [255, 99]; // Component registration
pub const MARKER_SYMBOL_COM: MarkerSymbol = [255, 100]; // Comment

/// Short mnemonic of a marker, `"UNK"` for anything not defined in Part 1.
pub fn marker_name(marker: MarkerSymbol) -> &'static str {
    match marker {
        MARKER_SYMBOL_SOC => "SOC",
        MARKER_SYMBOL_SOT => "SOT",
        MARKER_SYMBOL_SOD => "SOD",
        MARKER_SYMBOL_EOC => "EOC",
        MARKER_SYMBOL_SIZ => "SIZ",
        MARKER_SYMBOL_COD => "COD",
        MARKER_SYMBOL_COC => "COC",
        MARKER_SYMBOL_RGN => "RGN",
        MARKER_SYMBOL_QCD => "QCD",
        MARKER_SYMBOL_QCC => "QCC",
        MARKER_SYMBOL_POC => "POC",
        MARKER_SYMBOL_TLM => "TLM",
        MARKER_SYMBOL_PLM => "PLM",
        MARKER_SYMBOL_PLT => "PLT",
        MARKER_SYMBOL_PPM => "PPM",
        MARKER_SYMBOL_PPT => "PPT",
        MARKER_SYMBOL_SOP => "SOP",
        MARKER_SYMBOL_EPH => "EPH",
        MARKER_SYMBOL_CRG => "CRG",
        MARKER_SYMBOL_COM => "COM",
        _ => "UNK",
    }
}

pub(crate) fn marker_id(marker: MarkerSymbol) -> u16 {
    u16::from_be_bytes(marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_names() {
        assert_eq!(marker_name(MARKER_SYMBOL_SOT), "SOT");
        assert_eq!(marker_name(MARKER_SYMBOL_TLM), "TLM");
        assert_eq!(marker_name([255, 1]), "UNK");
        assert_eq!(marker_id(MARKER_SYMBOL_SOT), 0xFF90);
        assert_eq!(marker_id(MARKER_SYMBOL_EOC), 0xFFD9);
    }
}
