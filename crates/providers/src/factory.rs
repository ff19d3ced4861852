//! Provider factory
//!
//! Builds one concrete provider per modality from the tagged configuration.

use std::sync::Arc;

use voiceline_config::{
    AsrSettings, IntentSettings, LlmSettings, MemorySettings, ProviderSettings, TtsSettings,
    VadSettings,
};
use voiceline_core::FunctionDef;

use crate::intent::{FunctionCallIntent, NoIntent};
use crate::llm::{CannedLlm, EchoLlm};
use crate::memory::{LocalShortMemory, NoMemory};
use crate::speech::{NoopAsr, SilenceTts};
use crate::vad::{EnergyVad, PassthroughVad};
use crate::{
    AsrProvider, IntentProvider, LlmProvider, MemoryProvider, ProviderError, ProviderSet,
    TtsProvider, VadProvider,
};

pub fn create_vad(settings: &VadSettings) -> Result<Arc<dyn VadProvider>, ProviderError> {
    Ok(match settings {
        VadSettings::Energy { threshold } => {
            if !(0.0..=1.0).contains(threshold) {
                return Err(ProviderError::Config(format!(
                    "VAD threshold out of range: {threshold}"
                )));
            }
            Arc::new(EnergyVad::new(*threshold))
        }
        VadSettings::Passthrough => Arc::new(PassthroughVad),
    })
}

pub fn create_asr(settings: &AsrSettings) -> Result<Arc<dyn AsrProvider>, ProviderError> {
    Ok(match settings {
        AsrSettings::Noop => Arc::new(NoopAsr),
    })
}

pub fn create_llm(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    Ok(match settings {
        LlmSettings::Echo { prefix } => Arc::new(EchoLlm::new(prefix.clone())),
        LlmSettings::Canned { reply } => {
            if reply.is_empty() {
                return Err(ProviderError::Config(
                    "canned LLM requires a non-empty reply".to_string(),
                ));
            }
            Arc::new(CannedLlm::new(reply.clone()))
        }
    })
}

pub fn create_tts(settings: &TtsSettings) -> Result<Arc<dyn TtsProvider>, ProviderError> {
    Ok(match settings {
        TtsSettings::Silence { packet_bytes } => {
            if *packet_bytes == 0 {
                return Err(ProviderError::Config(
                    "TTS packet size must be positive".to_string(),
                ));
            }
            Arc::new(SilenceTts::new(*packet_bytes))
        }
    })
}

pub fn create_memory(settings: &MemorySettings) -> Result<Arc<dyn MemoryProvider>, ProviderError> {
    Ok(match settings {
        MemorySettings::Nomem => Arc::new(NoMemory),
        MemorySettings::LocalShort { max_entries } => Arc::new(LocalShortMemory::new(*max_entries)),
    })
}

pub fn create_intent(
    settings: &IntentSettings,
    functions: Vec<FunctionDef>,
) -> Result<Arc<dyn IntentProvider>, ProviderError> {
    Ok(match settings {
        IntentSettings::Nointent => Arc::new(NoIntent),
        IntentSettings::FunctionCall => Arc::new(FunctionCallIntent::new(functions)),
    })
}

/// Build the full provider binding for a new session.
///
/// A provider that fails to construct aborts session setup; there is no
/// silent fallback to a no-op.
pub fn build_providers(
    settings: &ProviderSettings,
    functions: Vec<FunctionDef>,
) -> Result<ProviderSet, ProviderError> {
    Ok(ProviderSet {
        vad: create_vad(&settings.vad)?,
        asr: create_asr(&settings.asr)?,
        llm: create_llm(&settings.llm)?,
        tts: create_tts(&settings.tts)?,
        memory: create_memory(&settings.memory)?,
        intent: create_intent(&settings.intent, functions)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_providers() {
        let set = build_providers(&ProviderSettings::default(), Vec::new());
        assert!(set.is_ok());
    }

    #[test]
    fn test_invalid_vad_threshold_rejected() {
        let settings = VadSettings::Energy { threshold: 3.0 };
        assert!(matches!(
            create_vad(&settings),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn test_empty_canned_reply_rejected() {
        let settings = LlmSettings::Canned {
            reply: String::new(),
        };
        assert!(create_llm(&settings).is_err());
    }
}
