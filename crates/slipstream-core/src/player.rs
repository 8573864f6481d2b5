use serde::{Deserialize, Serialize};

/// Room-scoped player identifier, assigned by the server on join.
pub type PlayerId = u64;

/// A racer in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color_id: String,
    pub vehicle_id: String,
}

/// Selectable car paint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerColor {
    pub id: &'static str,
    pub rgb: [u8; 3],
}

impl PlayerColor {
    pub const PALETTE: &[PlayerColor] = &[
        PlayerColor {
            id: "crimson",
            rgb: [255, 87, 87],
        },
        PlayerColor {
            id: "teal",
            rgb: [78, 205, 196],
        },
        PlayerColor {
            id: "amber",
            rgb: [255, 195, 18],
        },
        PlayerColor {
            id: "violet",
            rgb: [130, 88, 255],
        },
        PlayerColor {
            id: "lime",
            rgb: [46, 213, 115],
        },
        PlayerColor {
            id: "tangerine",
            rgb: [255, 148, 77],
        },
        PlayerColor {
            id: "cobalt",
            rgb: [83, 152, 255],
        },
        PlayerColor {
            id: "rose",
            rgb: [255, 107, 175],
        },
    ];

    pub fn by_id(id: &str) -> Option<&'static PlayerColor> {
        Self::PALETTE.iter().find(|c| c.id == id)
    }

    /// Requested color if known, otherwise one picked by join order.
    pub fn resolve(requested: Option<&str>, join_index: usize) -> &'static PlayerColor {
        requested
            .and_then(Self::by_id)
            .unwrap_or(&Self::PALETTE[join_index % Self::PALETTE.len()])
    }
}
