//! Schemas shipped with the tool

/// An embedded schema document
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub id: &'static str,
    pub source: &'static str,
}

pub const PRESETS: &[Preset] = &[
    Preset {
        id: "png",
        source: include_str!("../presets/png.ksy"),
    },
    Preset {
        id: "zip",
        source: include_str!("../presets/zip.ksy"),
    },
    Preset {
        id: "dos_mz",
        source: include_str!("../presets/dos_mz.ksy"),
    },
    Preset {
        id: "gif",
        source: include_str!("../presets/gif.ksy"),
    },
    Preset {
        id: "elf",
        source: include_str!("../presets/elf.ksy"),
    },
];

/// Source of a built-in schema
pub fn preset(id: &str) -> Option<&'static str> {
    PRESETS.iter().find(|p| p.id == id).map(|p| p.source)
}
