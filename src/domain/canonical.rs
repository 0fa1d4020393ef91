//! Canonical vocabularies
//!
//! Every classification field of a record resolves to one of these fixed,
//! language-independent sets, or is explicitly flagged as unmapped.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A closed vocabulary with a stable textual name per member.
pub trait CanonicalName: Sized + Copy + 'static {
    const ALL: &'static [Self];

    fn canonical_name(self) -> &'static str;

    fn from_canonical(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|member| member.canonical_name().eq_ignore_ascii_case(name))
    }
}

macro_rules! canonical_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl CanonicalName for $name {
            const ALL: &'static [Self] = &[$(Self::$variant),+];

            fn canonical_name(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.canonical_name())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.canonical_name())
            }
        }
    };
}

canonical_enum!(
    /// Elemental affinity.
    Element {
        Pyro => "Pyro",
        Hydro => "Hydro",
        Anemo => "Anemo",
        Electro => "Electro",
        Dendro => "Dendro",
        Cryo => "Cryo",
        Geo => "Geo",
    }
);

canonical_enum!(
    /// Weapon category a character wields, or a weapon belongs to.
    WeaponCategory {
        Sword => "Sword",
        Claymore => "Claymore",
        Polearm => "Polearm",
        Bow => "Bow",
        Catalyst => "Catalyst",
    }
);

canonical_enum!(
    /// Home region.
    Region {
        Mondstadt => "Mondstadt",
        Liyue => "Liyue",
        Inazuma => "Inazuma",
        Sumeru => "Sumeru",
        Fontaine => "Fontaine",
        Natlan => "Natlan",
        Snezhnaya => "Snezhnaya",
    }
);

canonical_enum!(
    /// Secondary (ascension) stat kinds.
    StatKind {
        HpPercent => "hp_percent",
        AtkPercent => "atk_percent",
        DefPercent => "def_percent",
        CritRate => "crit_rate",
        CritDmg => "crit_dmg",
        EnergyRecharge => "energy_recharge",
        ElementalMastery => "elemental_mastery",
        HealingBonus => "healing_bonus",
        PhysicalDmgBonus => "physical_dmg_bonus",
        ElementalDmgBonus => "elemental_dmg_bonus",
    }
);

/// Either a member of the canonical set or the raw token that failed to map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Canonical<T> {
    Mapped(T),
    Unmapped(String),
}

pub const UNMAPPED_PREFIX: &str = "unmapped:";

impl<T: CanonicalName> Canonical<T> {
    /// Textual form used in storage: the canonical name, or `unmapped:<raw>`.
    #[must_use]
    pub fn storage_value(&self) -> String {
        match self {
            Self::Mapped(value) => value.canonical_name().to_string(),
            Self::Unmapped(raw) => format!("{UNMAPPED_PREFIX}{raw}"),
        }
    }

    #[must_use]
    pub fn from_storage(value: &str) -> Self {
        if let Some(raw) = value.strip_prefix(UNMAPPED_PREFIX) {
            return Self::Unmapped(raw.to_string());
        }
        T::from_canonical(value).map_or_else(|| Self::Unmapped(value.to_string()), Self::Mapped)
    }
}

impl<T: CanonicalName> fmt::Display for Canonical<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_value())
    }
}

impl<T: CanonicalName> Serialize for Canonical<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.storage_value())
    }
}

impl<'de, T: CanonicalName> Deserialize<'de> for Canonical<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_storage(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_form_round_trips_unmapped_marker() {
        let unmapped: Canonical<Element> = Canonical::Unmapped("暗".to_string());
        assert_eq!(unmapped.storage_value(), "unmapped:暗");
        assert_eq!(Canonical::<Element>::from_storage("unmapped:暗"), unmapped);
        assert_eq!(
            Canonical::<Element>::from_storage("Anemo"),
            Canonical::Mapped(Element::Anemo)
        );
    }

    #[test]
    fn canonical_lookup_ignores_ascii_case() {
        assert_eq!(StatKind::from_canonical("HEALING_BONUS"), Some(StatKind::HealingBonus));
        assert_eq!(Region::from_canonical("liyue"), Some(Region::Liyue));
        assert_eq!(WeaponCategory::from_canonical("spear"), None);
    }
}
