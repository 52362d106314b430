use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::PlaybackError;

/// Cadena de filtros de ffmpeg para el bass boost.
pub const BASS_BOOST_CHAIN: &str = "bass=g=10,dynaudnorm=f=150:g=15:n=0";

/// Niveles de calidad disponibles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    #[default]
    High,
    Ultra,
}

impl Quality {
    pub const ALL: [Quality; 4] = [Quality::Low, Quality::Medium, Quality::High, Quality::Ultra];

    /// Bitrate de salida en kbps
    pub fn bitrate_kbps(self) -> u32 {
        match self {
            Quality::Low => 96,
            Quality::Medium => 128,
            Quality::High => 192,
            Quality::Ultra => 256,
        }
    }

    pub fn codec(self) -> &'static str {
        "libopus"
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
            Quality::Ultra => "ultra",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = PlaybackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            "ultra" => Ok(Quality::Ultra),
            other => Err(PlaybackError::InvalidQuality(other.to_string())),
        }
    }
}

/// Filtros aplicados al abrir un pipeline.
///
/// Cambiar cualquiera de estos valores con una pista sonando obliga a reabrir
/// la fuente; nunca se modifican sobre un pipeline ya en marcha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterConfig {
    pub bass_boost: bool,
    pub quality: Quality,
    pub video_mode: bool,
}

impl FilterConfig {
    pub fn with_bass_boost(mut self, enabled: bool) -> Self {
        self.bass_boost = enabled;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn audio_filter(&self) -> Option<&'static str> {
        self.bass_boost.then_some(BASS_BOOST_CHAIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_tiers() {
        let rates: Vec<u32> = Quality::ALL.iter().map(|q| q.bitrate_kbps()).collect();
        assert_eq!(rates, vec![96, 128, 192, 256]);
        assert_eq!(Quality::default(), Quality::High);
    }

    #[test]
    fn test_quality_parsing() {
        assert_eq!("ULTRA".parse::<Quality>().unwrap(), Quality::Ultra);
        assert_eq!(" low ".parse::<Quality>().unwrap(), Quality::Low);
        assert!(matches!(
            "lossless".parse::<Quality>(),
            Err(PlaybackError::InvalidQuality(q)) if q == "lossless"
        ));
    }

    #[test]
    fn test_bass_filter_only_when_enabled() {
        let filters = FilterConfig::default();
        assert_eq!(filters.audio_filter(), None);
        assert_eq!(filters.with_bass_boost(true).audio_filter(), Some(BASS_BOOST_CHAIN));
    }
}
