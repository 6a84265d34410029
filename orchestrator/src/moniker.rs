use rand::prelude::*;

// Kept deliberately short; combined with the block name the namespace is
// 40^2 * 48 combinations per volume, and callers retry on pod-name conflicts.
const TONES: &[&str] = &[
    "amber", "ashen", "azure", "bright", "broad", "calm", "clear", "cold", "crisp", "dark",
    "deep", "dim", "dry", "dusky", "faint", "fine", "firm", "fresh", "frosty", "gentle",
    "grand", "grave", "keen", "late", "light", "lively", "lone", "low", "mellow", "mild",
    "misty", "pale", "plain", "proud", "quiet", "rapid", "sharp", "slow", "soft", "still",
];

const SHAPES: &[&str] = &[
    "arched", "banded", "braided", "carved", "coiled", "curved", "dotted", "edged", "etched",
    "faceted", "flat", "fluted", "folded", "forked", "framed", "fused", "grained", "grooved",
    "hollow", "inlaid", "jagged", "keeled", "knotted", "layered", "marbled", "notched",
    "oblong", "pitted", "pleated", "ribbed", "ridged", "rounded", "scored", "seamed",
    "slanted", "spiral", "tapered", "tiered", "veined", "woven",
];

const STONES: &[&str] = &[
    "agate", "basalt", "beryl", "chert", "coral", "flint", "gabbro", "garnet", "gneiss",
    "granite", "gypsum", "jasper", "lignite", "marble", "mica", "obsidian", "olivine", "onyx",
    "opal", "pumice", "pyrite", "quartz", "schist", "shale", "slate", "spinel", "topaz",
    "tuff", "zircon", "amethyst", "calcite", "dolomite", "feldspar", "halite", "hematite",
    "kaolin", "limestone", "magnetite", "sandstone", "travertine",
];

/// A three-token human-readable moniker, e.g. `calm-ribbed-basalt`.
pub fn moniker() -> String {
    let mut rng = rand::rng();
    format!(
        "{}-{}-{}",
        TONES.choose(&mut rng).unwrap(),
        SHAPES.choose(&mut rng).unwrap(),
        STONES.choose(&mut rng).unwrap(),
    )
}
