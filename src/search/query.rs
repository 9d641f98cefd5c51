//! Sigil query DSL compilation and evaluation.
//!
//! A query is a comma-separated list of terms. A leading sigil selects
//! the field a term targets:
//!
//! - `!` genre
//! - `@` artist
//! - `#` album
//! - `$` title
//! - no sigil: artist, album or title
//!
//! Terms sharing a sigil are alternatives (OR); distinct sigils are
//! combined with AND. `"!jazz, @miles, @coltrane"` reads "genre contains
//! jazz AND (artist contains miles OR artist contains coltrane)".

use crate::models::{FieldGroup, FieldSelector, Media, QueryPlan, SearchRequest};

/// Characters that mark a query as using the sigil DSL.
pub const SIGILS: [char; 4] = ['!', '@', '#', '$'];

/// Compile a raw query string into a `QueryPlan`.
///
/// Never fails: every string is a valid query. Blank or
/// separator-only input yields the empty plan, which matches every
/// record. A sigil with nothing after it yields an empty text, which
/// matches every record for that field.
pub fn compile(input: &str) -> QueryPlan {
    let mut groups: Vec<FieldGroup> = Vec::new();

    for piece in input.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }

        let (selector, rest) = FieldSelector::from_sigil(piece);
        let text = rest.trim().to_string();

        match groups.iter_mut().find(|g| g.selector == selector) {
            Some(group) => group.texts.push(text),
            None => groups.push(FieldGroup {
                selector,
                texts: vec![text],
            }),
        }
    }

    QueryPlan { groups }
}

/// Whether `input` should go to a backend's native query syntax.
///
/// True only for non-blank input without sigils or separators.
pub fn is_native_candidate(input: &str) -> bool {
    let trimmed = input.trim();
    !trimmed.is_empty() && !trimmed.contains(',') && !trimmed.contains(SIGILS)
}

impl SearchRequest {
    /// Compile `input`, keeping the raw text for native-syntax backends
    /// when it qualifies.
    pub fn new(input: &str) -> Self {
        Self {
            plan: compile(input),
            native: is_native_candidate(input).then(|| input.trim().to_string()),
        }
    }

    /// Compile `input` without the native fallback.
    pub fn plan_only(input: &str) -> Self {
        Self {
            plan: compile(input),
            native: None,
        }
    }
}

fn contains_folded(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn field_value(media: &Media, selector: FieldSelector) -> &str {
    match selector {
        FieldSelector::Genre => &media.genre,
        FieldSelector::Artist => &media.artist,
        FieldSelector::Album => &media.album,
        FieldSelector::Title => &media.title,
        FieldSelector::Any => "",
    }
}

fn generic_matches(media: &Media, text: &str) -> bool {
    [&media.artist, &media.album, &media.title]
        .iter()
        .any(|value| contains_folded(value, text))
}

impl QueryPlan {
    /// Evaluate the plan against one record with case-insensitive
    /// substring matching.
    pub fn matches(&self, media: &Media) -> bool {
        self.groups.iter().all(|group| match group.selector {
            FieldSelector::Any => group.texts.iter().all(|text| generic_matches(media, text)),
            selector => {
                let value = field_value(media, selector);
                group.texts.iter().any(|text| contains_folded(value, text))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn group(selector: FieldSelector, texts: &[&str]) -> FieldGroup {
        FieldGroup {
            selector,
            texts: texts.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn media(artist: &str, album: &str, title: &str, genre: &str) -> Media {
        Media {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            track_number: 1,
            disc_number: 1,
            genre: genre.to_string(),
            path: PathBuf::from("/m/x.mp3"),
        }
    }

    #[test]
    fn compile_groups_terms_by_sigil_in_first_seen_order() {
        let plan = compile("!jazz, @miles, @coltrane, #kind of blue");

        assert_eq!(
            plan.groups,
            vec![
                group(FieldSelector::Genre, &["jazz"]),
                group(FieldSelector::Artist, &["miles", "coltrane"]),
                group(FieldSelector::Album, &["kind of blue"]),
            ]
        );
    }

    #[test]
    fn compile_trims_and_drops_empty_pieces() {
        let plan = compile("  blue ,, @ miles  , ");

        assert_eq!(
            plan.groups,
            vec![
                group(FieldSelector::Any, &["blue"]),
                group(FieldSelector::Artist, &["miles"]),
            ]
        );
    }

    #[test]
    fn blank_inputs_compile_to_the_empty_plan() {
        for input in ["", "   ", ",", " , ,, "] {
            assert_eq!(compile(input), compile(""), "{input:?}");
        }
        assert!(compile("").is_empty());
    }

    #[test]
    fn bare_sigil_keeps_an_empty_text() {
        let plan = compile("$");
        assert_eq!(plan.groups, vec![group(FieldSelector::Title, &[""])]);
        assert!(plan.matches(&media("a", "b", "c", "d")));
    }

    #[test]
    fn compile_preserves_case() {
        let plan = compile("@Miles");
        assert_eq!(plan.groups[0].texts, vec!["Miles"]);
    }

    #[test]
    fn only_the_leading_character_is_a_sigil() {
        let plan = compile("ac/dc!, $what's #1");
        assert_eq!(
            plan.groups,
            vec![
                group(FieldSelector::Any, &["ac/dc!"]),
                group(FieldSelector::Title, &["what's #1"]),
            ]
        );
    }

    #[test]
    fn matching_is_or_within_and_across_groups() {
        let plan = compile("!jazz, @miles, @coltrane, #kind of blue");

        assert!(plan.matches(&media("Miles Davis", "Kind of Blue", "So What", "Jazz")));
        assert!(!plan.matches(&media("John Coltrane", "Blue Train", "Blue Train", "Jazz")));
        assert!(!plan.matches(&media("Miles Davis", "Kind of Blue", "So What", "Rock")));
    }

    #[test]
    fn generic_terms_are_each_required() {
        let coltrane = media("John Coltrane", "Blue Train", "Blue Train", "Jazz");
        let miles = media("Miles Davis", "Kind of Blue", "So What", "Jazz");

        assert!(compile("blue, train").matches(&coltrane));
        assert!(!compile("blue, train").matches(&miles));
        assert!(compile("davis").matches(&miles));
        // Genre is not part of the generic fields.
        assert!(!compile("jazz").matches(&miles));
    }

    #[test]
    fn native_candidates_have_no_sigils_or_commas() {
        assert!(is_native_candidate("artist:queen"));
        assert!(is_native_candidate(" blue train "));
        assert!(!is_native_candidate("@queen"));
        assert!(!is_native_candidate("blue, train"));
        assert!(!is_native_candidate("what's #1"));
        assert!(!is_native_candidate("   "));
    }

    #[test]
    fn search_request_keeps_trimmed_native_text() {
        let request = SearchRequest::new("  +blue -moods ");
        assert_eq!(request.native.as_deref(), Some("+blue -moods"));

        assert_eq!(SearchRequest::new("@miles").native, None);
        assert_eq!(SearchRequest::plan_only("blue").native, None);
    }
}
