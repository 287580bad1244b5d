//! Fixed vocabulary for seed queries
//!
//! Every entry is a single lowercase token. No entry equals a literal word of
//! any template, and every template carries one literal keyword that no other
//! template uses, so a rendered query identifies its template and the words
//! in each position.

/// An axis of the vocabulary: its word list and the prime step used to walk it
#[derive(Debug, Clone, Copy)]
pub struct Axis {
    pub name: &'static str,
    pub words: &'static [&'static str],
    pub step: u64,
}

impl Axis {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

pub const GENRES: Axis = Axis {
    name: "genre",
    words: &[
        "pop", "rock", "jazz", "blues", "soul", "funk", "reggae", "country", "folk", "metal",
        "punk", "indie", "techno", "house", "trance", "ambient", "lofi", "classical", "r&b",
        "hip-hop", "edm", "disco", "gospel", "afrobeat",
    ],
    step: 7,
};

pub const MOODS: Axis = Axis {
    name: "mood",
    words: &[
        "chill", "happy", "sad", "upbeat", "relaxing", "energetic", "romantic", "dark", "dreamy",
        "mellow", "epic", "nostalgic", "groovy",
    ],
    step: 5,
};

/// Regional music scenes
pub const REGIONS: Axis = Axis {
    name: "region",
    words: &[
        "brazilian", "korean", "japanese", "latin", "british", "french", "german", "nigerian",
        "indian", "swedish", "italian", "jamaican", "turkish", "mexican", "australian", "irish",
    ],
    step: 3,
};

pub const LANGUAGES: Axis = Axis {
    name: "language",
    words: &[
        "english", "spanish", "portuguese", "hindi", "arabic", "tagalog", "indonesian", "russian",
        "mandarin", "swahili",
    ],
    step: 11,
};

pub const DECADES: Axis = Axis {
    name: "decade",
    words: &["60s", "70s", "80s", "90s", "2000s", "2010s", "2020s"],
    step: 13,
};

pub const TOPICS: Axis = Axis {
    name: "topic",
    words: &[
        "workout", "study", "sleep", "driving", "party", "coffee", "rainy", "summer", "winter",
        "gaming", "cooking", "focus", "running", "yoga", "wedding", "roadtrip", "sunset",
        "morning", "night", "reading",
    ],
    step: 17,
};

pub const TEMPLATES: Axis = Axis {
    name: "template",
    words: &[
        "{mood} {genre} playlist",
        "{genre} {mood} mix {decade}",
        "best {mood} {genre} songs",
        "{region} {genre} {mood} hits",
        "{mood} {genre} for {topic}",
        "{decade} {genre} {mood} essentials",
        "{genre} {mood} {language} radio",
        "{mood} {genre} {topic} vibes",
    ],
    step: 19,
};

/// Every axis, templates last
pub const AXES: [Axis; 7] = [GENRES, MOODS, REGIONS, LANGUAGES, DECADES, TOPICS, TEMPLATES];

/// Largest per-slot count for which queries of one slot never collide
///
/// Genre and mood steps are coprime with their list lengths, and the two
/// lengths are coprime with each other, so the (genre, mood) pair repeats
/// only after `genres × moods` indices.
pub const MAX_PER_SLOT: u32 = (GENRES.words.len() * MOODS.words.len()) as u32;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn gcd(a: u64, b: u64) -> u64 {
        if b == 0 {
            a
        } else {
            gcd(b, a % b)
        }
    }

    #[test]
    fn test_axis_sizes() {
        let sizes: Vec<usize> = AXES.iter().map(Axis::len).collect();
        assert_eq!(sizes, vec![24, 13, 16, 10, 7, 20, 8]);
        assert_eq!(MAX_PER_SLOT, 312);
    }

    #[test]
    fn test_steps_coprime_with_lengths() {
        for axis in AXES {
            assert_eq!(gcd(axis.step, axis.len() as u64), 1, "axis {}", axis.name);
        }
    }

    #[test]
    fn test_words_are_single_lowercase_tokens() {
        for axis in &AXES[..6] {
            for word in axis.words {
                assert!(!word.contains(' '), "{word}");
                assert_eq!(word.to_lowercase(), *word);
            }
        }
    }

    #[test]
    fn test_template_keywords_unique() {
        let literals: Vec<Vec<&str>> = TEMPLATES
            .words
            .iter()
            .map(|t| t.split(' ').filter(|w| !w.starts_with('{')).collect())
            .collect();

        let vocab: HashSet<&str> = AXES[..6].iter().flat_map(|a| a.words.iter().copied()).collect();

        for (i, words) in literals.iter().enumerate() {
            assert!(!words.is_empty());
            for w in words {
                assert!(!vocab.contains(w), "literal {w} is also a vocabulary word");
            }
            let own = words.iter().any(|w| {
                literals
                    .iter()
                    .enumerate()
                    .all(|(j, other)| j == i || !other.contains(w))
            });
            assert!(own, "template {i} has no unique keyword");
        }
    }

    #[test]
    fn test_every_template_has_genre_and_mood() {
        for t in TEMPLATES.words {
            assert!(t.contains("{genre}") && t.contains("{mood}"), "{t}");
        }
    }
}
