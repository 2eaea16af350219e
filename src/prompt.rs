//! Style prompts and the weighted prompt set that steers generation.
//!
//! A [`Prompt`] is fixed at startup except for its weight (and, rarely, its
//! text).  The [`PromptSet`] keeps prompts in insertion order; it is the
//! snapshot handed to the session whenever anything changes.
//!
//! Mutation sources (pointer input, MIDI knobs) never touch a prompt
//! directly.  They build a [`PromptUpdate`] request and the owner of the set
//! applies it with [`PromptSet::apply`], so a snapshot being serialised can
//! never observe a half-applied change.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Lowest allowed weight; also means "inactive".
pub const MIN_WEIGHT: f32 = 0.0;
/// Highest allowed weight.
pub const MAX_WEIGHT: f32 = 2.0;

/// Clamp `weight` into `[MIN_WEIGHT, MAX_WEIGHT]`; NaN becomes 0.
pub fn clamp_weight(weight: f32) -> f32 {
    if weight.is_nan() {
        return MIN_WEIGHT;
    }
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// Map a 7-bit MIDI controller value onto the weight range.
///
/// ```
/// use prompt_dj::prompt::cc_value_to_weight;
///
/// assert_eq!(cc_value_to_weight(0), 0.0);
/// assert_eq!(cc_value_to_weight(127), 2.0);
/// ```
pub fn cc_value_to_weight(value: u8) -> f32 {
    clamp_weight(f32::from(value.min(127)) / 127.0 * MAX_WEIGHT)
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// One named style axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub id: String,
    pub text: String,
    /// Secondary, localized display text.
    pub native_text: String,
    weight: f32,
    /// MIDI control-change number bound to this prompt (0–127).
    pub cc: u8,
    /// Display color, `#rrggbb`.
    pub color: String,
}

impl Prompt {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        native_text: impl Into<String>,
        cc: u8,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            native_text: native_text.into(),
            weight: MIN_WEIGHT,
            cc: cc.min(127),
            color: color.into(),
        }
    }

    /// Builder-style initial weight (clamped).
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.set_weight(weight);
        self
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f32) {
        self.weight = clamp_weight(weight);
    }

    pub fn is_active(&self) -> bool {
        self.weight > MIN_WEIGHT
    }
}

// ---------------------------------------------------------------------------
// WeightedPrompt
// ---------------------------------------------------------------------------

/// The `{text, weight}` pair the remote session understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPrompt {
    pub text: String,
    pub weight: f32,
}

// ---------------------------------------------------------------------------
// PromptUpdate
// ---------------------------------------------------------------------------

/// A request to change one prompt, submitted by an input source.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptUpdate {
    SetWeight { id: String, weight: f32 },
    SetText { id: String, text: String, native_text: Option<String> },
    /// Every prompt back to weight 0.
    ResetAll,
}

// ---------------------------------------------------------------------------
// PromptSet
// ---------------------------------------------------------------------------

/// Insertion-ordered map from prompt id to [`Prompt`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptSet {
    prompts: Vec<Prompt>,
}

impl PromptSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id.  A replaced prompt keeps its position.
    pub fn insert(&mut self, prompt: Prompt) {
        match self.prompts.iter_mut().find(|p| p.id == prompt.id) {
            Some(existing) => *existing = prompt,
            None => self.prompts.push(prompt),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.id == id)
    }

    /// The prompt bound to MIDI controller `cc`, if any.
    pub fn by_cc(&self, cc: u8) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.cc == cc)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prompt> {
        self.prompts.iter()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Returns `true` when at least one prompt has a weight above zero.
    pub fn has_active(&self) -> bool {
        self.prompts.iter().any(Prompt::is_active)
    }

    /// Active prompts as wire pairs, in set order, skipping any whose text
    /// is rejected by `is_filtered`.
    pub fn weighted_prompts<F>(&self, is_filtered: F) -> Vec<WeightedPrompt>
    where
        F: Fn(&str) -> bool,
    {
        self.prompts
            .iter()
            .filter(|p| p.is_active() && !is_filtered(&p.text))
            .map(|p| WeightedPrompt {
                text: p.text.clone(),
                weight: p.weight,
            })
            .collect()
    }

    /// Apply an update request.  Returns `false` when it names an unknown id
    /// or changes nothing.
    pub fn apply(&mut self, update: PromptUpdate) -> bool {
        match update {
            PromptUpdate::SetWeight { id, weight } => {
                let Some(p) = self.prompts.iter_mut().find(|p| p.id == id) else {
                    log::warn!("prompt: unknown id {id:?}");
                    return false;
                };
                let before = p.weight;
                p.set_weight(weight);
                before != p.weight
            }
            PromptUpdate::SetText {
                id,
                text,
                native_text,
            } => {
                let Some(p) = self.prompts.iter_mut().find(|p| p.id == id) else {
                    log::warn!("prompt: unknown id {id:?}");
                    return false;
                };
                let changed = p.text != text
                    || native_text.as_ref().is_some_and(|n| *n != p.native_text);
                p.text = text;
                if let Some(native) = native_text {
                    p.native_text = native;
                }
                changed
            }
            PromptUpdate::ResetAll => {
                let mut changed = false;
                for p in &mut self.prompts {
                    changed |= p.is_active();
                    p.set_weight(MIN_WEIGHT);
                }
                changed
            }
        }
    }
}

impl FromIterator<Prompt> for PromptSet {
    fn from_iter<I: IntoIterator<Item = Prompt>>(iter: I) -> Self {
        let mut set = PromptSet::new();
        for p in iter {
            set.insert(p);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Default palette
// ---------------------------------------------------------------------------

/// `(color, text, native_text)` for the built-in sixteen prompts.
pub const DEFAULT_PROMPTS: [(&str, &str, &str); 16] = [
    ("#ff9933", "Desi Dhol", "देसी ढोल"),
    ("#f9c200", "Bollywood Retro", "बॉलीवुड रेट्रो"),
    ("#e52b50", "Sufi Soul", "सूफी सोल"),
    ("#50c878", "Carnatic Chill", "कर्नाटक चिल"),
    ("#ffdf00", "Indo-Fusion", "इंडो-फ्यूजन"),
    ("#138808", "Raga Flow", "राग प्रवाह"),
    ("#007fff", "Tabla Trance", "तबला ट्रांस"),
    ("#ff7f50", "Lotus Lounge", "लोटस लाउंज"),
    ("#c71585", "Peacock Pop", "पीकॉक पॉप"),
    ("#e34234", "Bhangra Bass", "भांगड़ा बास"),
    ("#000080", "Bansuri Breeze", "बांसुरी ब्रीज़"),
    ("#8a2be2", "Thumri Trap", "ठुमरी ट्रैप"),
    ("#ff6700", "Ghazal Groove", "ग़ज़ल ग्रूव"),
    ("#40e0d0", "Qawwali Quest", "क़व्वाली क्वेस्ट"),
    ("#daa520", "Ghungroo Glitch", "घुंघरू ग्लिच"),
    ("#ffc0cb", "Sitar Synths", "सितार सिंथ"),
];

/// Number of prompts switched on in a fresh set.
pub const INITIAL_ACTIVE: usize = 3;

/// Build the startup set: `prompt-{i}` bound to CC `i`, with
/// [`INITIAL_ACTIVE`] prompts picked at random set to weight 1.
pub fn build_initial_prompts<R: Rng + ?Sized>(rng: &mut R) -> PromptSet {
    let indices: Vec<usize> = (0..DEFAULT_PROMPTS.len()).collect();
    let start_on: Vec<usize> = indices
        .choose_multiple(rng, INITIAL_ACTIVE)
        .copied()
        .collect();

    DEFAULT_PROMPTS
        .iter()
        .enumerate()
        .map(|(i, (color, text, native))| {
            let weight = if start_on.contains(&i) { 1.0 } else { 0.0 };
            Prompt::new(format!("prompt-{i}"), *text, *native, i as u8, *color).with_weight(weight)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
