//! Deterministic names for threads, branches, worktrees and tmux sessions.
//!
//! Session names follow `app-<repoSlug>[-<threadSlug>]-<tabSlug>`. Repo and
//! thread slugs may contain dashes; tab slugs never do, so a name splits back
//! into its components by position once the repo slug is known.

use rand::seq::SliceRandom;
use rand::Rng;

/// Leading component of every session name.
pub const SESSION_PREFIX: &str = "app";

/// Upper bound on slug length, suffix included.
pub const MAX_SLUG_LEN: usize = 40;

/// Slug used when a name has no usable characters.
const FALLBACK_SLUG: &str = "thread";

/// Tab slug of a thread's first agent tab.
pub const MAIN_TAB_SLUG: &str = "main";

const SHELL_TAB_SLUG: &str = "shell";
const AGENT_TAB_STEM: &str = "tab";

/// Give up on random picks after this many collisions and suffix instead.
const NAME_ATTEMPTS: usize = 16;

/// Word lists generated thread names are drawn from.
pub const ADJECTIVES: &[&str] = &[
    "amber", "brisk", "calm", "clever", "coral", "crisp", "dusty", "eager", "gentle", "golden",
    "hidden", "humble", "icy", "jolly", "lively", "lucky", "mellow", "misty", "nimble", "quiet",
    "rapid", "river", "rustic", "silent", "silver", "steady", "sunny", "swift", "tidy", "wild",
];

pub const ANIMALS: &[&str] = &[
    "badger", "beaver", "bison", "crane", "falcon", "ferret", "finch", "fox", "gecko", "heron",
    "ibis", "jackal", "koala", "lemur", "lynx", "marten", "moose", "newt", "otter", "owl",
    "panda", "puffin", "quail", "raven", "seal", "stoat", "tapir", "viper", "walrus", "wren",
];

/// Sanitize a human-readable name into a session-safe slug.
///
/// Output contains only `[a-z0-9-]`, never starts or ends with a dash, never
/// contains two dashes in a row and is at most `MAX_SLUG_LEN` long.
/// `slugify(slugify(x)) == slugify(x)` for every input.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(MAX_SLUG_LEN));
    let mut prev_dash = false;

    for ch in name.chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' => Some(ch),
            'A'..='Z' => Some(ch.to_ascii_lowercase()),
            _ => None,
        };

        match mapped {
            Some(ch) => {
                out.push(ch);
                prev_dash = false;
            }
            None => {
                if !prev_dash && !out.is_empty() {
                    out.push('-');
                    prev_dash = true;
                }
            }
        }
    }

    out.truncate(MAX_SLUG_LEN);
    while out.ends_with('-') {
        out.pop();
    }

    if out.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        out
    }
}

/// Return `base` if free, else the first free `base-N` (N >= 2).
///
/// The base is shortened as needed so the suffixed result stays within
/// `MAX_SLUG_LEN`.
pub fn unique_slug(base: &str, is_taken: impl Fn(&str) -> bool) -> String {
    if !is_taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| {
            let suffix = format!("-{n}");
            let mut stem = base.to_string();
            stem.truncate(MAX_SLUG_LEN.saturating_sub(suffix.len()));
            while stem.ends_with('-') {
                stem.pop();
            }
            format!("{stem}{suffix}")
        })
        .find(|candidate| !is_taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Compose a session name from its components.
pub fn build_session_name(repo_slug: &str, thread_slug: Option<&str>, tab_slug: &str) -> String {
    match thread_slug {
        Some(thread) => format!("{SESSION_PREFIX}-{repo_slug}-{thread}-{tab_slug}"),
        None => format!("{SESSION_PREFIX}-{repo_slug}-{tab_slug}"),
    }
}

/// Components recovered from a session name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNameParts {
    pub repo_slug: String,
    pub thread_slug: Option<String>,
    pub tab_slug: String,
}

/// Split a session name back into its components, given the repo slug.
///
/// Returns `None` if `name` was not built for `repo_slug`.
pub fn parse_session_name(name: &str, repo_slug: &str) -> Option<SessionNameParts> {
    let rest = name
        .strip_prefix(SESSION_PREFIX)?
        .strip_prefix('-')?
        .strip_prefix(repo_slug)?
        .strip_prefix('-')?;
    if rest.is_empty() {
        return None;
    }

    let (thread_slug, tab_slug) = match rest.rsplit_once('-') {
        Some((thread, tab)) if !thread.is_empty() && !tab.is_empty() => {
            (Some(thread.to_string()), tab.to_string())
        }
        Some(_) => return None,
        None => (None, rest.to_string()),
    };

    Some(SessionNameParts {
        repo_slug: repo_slug.to_string(),
        thread_slug,
        tab_slug,
    })
}

/// Tab slug component of any session name (the text after the last dash).
pub fn tab_slug_of(session_name: &str) -> Option<&str> {
    session_name.rsplit_once('-').map(|(_, tab)| tab)
}

/// Next free tab slug within one thread.
///
/// Agent tabs go `main`, `tab2`, `tab3`, ...; shell tabs go `shell`,
/// `shell2`, ... Slugs never contain a dash.
pub fn next_tab_slug(agent: bool, existing: &[&str]) -> String {
    let (first, stem) = if agent {
        (MAIN_TAB_SLUG, AGENT_TAB_STEM)
    } else {
        (SHELL_TAB_SLUG, SHELL_TAB_SLUG)
    };
    if !existing.contains(&first) {
        return first.to_string();
    }
    (2..)
        .map(|n| format!("{stem}{n}"))
        .find(|candidate| !existing.contains(&candidate.as_str()))
        .unwrap_or_else(|| first.to_string())
}

/// Pick a human-memorable `adjective-animal` thread name not yet taken.
pub fn generate_thread_name<R: Rng + ?Sized>(
    rng: &mut R,
    is_taken: impl Fn(&str) -> bool,
) -> String {
    let mut last = String::new();
    for _ in 0..NAME_ATTEMPTS {
        let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("quiet");
        let animal = ANIMALS.choose(rng).copied().unwrap_or("otter");
        last = format!("{adjective}-{animal}");
        if !is_taken(&last) {
            return last;
        }
    }
    unique_slug(&last, is_taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn slugify_lowercases_and_collapses_separators() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("Hello---World"), "hello-world");
        assert_eq!(slugify("  Fix the  login bug  "), "fix-the-login-bug");
    }

    #[test]
    fn slugify_drops_non_ascii() {
        assert_eq!(slugify("café crème"), "caf-cr-me");
        assert_eq!(slugify("ünïcode"), "n-code");
    }

    #[test]
    fn slugify_falls_back_when_empty() {
        assert_eq!(slugify(""), "thread");
        assert_eq!(slugify("!!!"), "thread");
        assert_eq!(slugify("日本語"), "thread");
    }

    #[test]
    fn slugify_caps_length_without_trailing_dash() {
        let long = "word ".repeat(20);
        let slug = slugify(&long);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn slugify_is_idempotent() {
        let inputs = [
            "River Otter",
            "feature/login--page",
            "  --leading and trailing--  ",
            "MiXeD_case 123",
            "a very long name that certainly exceeds the configured slug length cap",
            "x-".repeat(30).as_str(),
            "",
            "🎉 party",
        ]
        .map(str::to_string);
        for input in &inputs {
            let once = slugify(input);
            assert_eq!(slugify(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn unique_slug_returns_base_when_free() {
        assert_eq!(unique_slug("otter", |_| false), "otter");
    }

    #[test]
    fn unique_slug_appends_first_free_suffix() {
        let taken = ["otter", "otter-2"];
        assert_eq!(unique_slug("otter", |s| taken.contains(&s)), "otter-3");
    }

    #[test]
    fn unique_slug_respects_length_cap() {
        let base = "a".repeat(MAX_SLUG_LEN);
        let result = unique_slug(&base, |s| s == base);
        assert!(result.len() <= MAX_SLUG_LEN);
        assert!(result.ends_with("-2"));
    }

    #[test]
    fn build_session_name_with_thread() {
        assert_eq!(
            build_session_name("acme", Some("river-otter"), "main"),
            "app-acme-river-otter-main"
        );
    }

    #[test]
    fn build_session_name_for_main_thread() {
        assert_eq!(build_session_name("acme", None, "main"), "app-acme-main");
    }

    #[test]
    fn parse_recovers_components() {
        let parts = parse_session_name("app-acme-river-otter-main", "acme").unwrap();
        assert_eq!(parts.repo_slug, "acme");
        assert_eq!(parts.thread_slug.as_deref(), Some("river-otter"));
        assert_eq!(parts.tab_slug, "main");
    }

    #[test]
    fn parse_handles_dashed_repo_slug() {
        let name = build_session_name("my-app", Some("calm-fox-2"), "shell3");
        let parts = parse_session_name(&name, "my-app").unwrap();
        assert_eq!(parts.thread_slug.as_deref(), Some("calm-fox-2"));
        assert_eq!(parts.tab_slug, "shell3");
    }

    #[test]
    fn parse_main_thread_name() {
        let parts = parse_session_name("app-acme-tab2", "acme").unwrap();
        assert_eq!(parts.thread_slug, None);
        assert_eq!(parts.tab_slug, "tab2");
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert!(parse_session_name("app-other-main", "acme").is_none());
        assert!(parse_session_name("tmux-acme-main", "acme").is_none());
        assert!(parse_session_name("app-acme-", "acme").is_none());
        assert!(parse_session_name("app-acme", "acme").is_none());
    }

    #[test]
    fn build_then_parse_roundtrips_for_generated_tabs() {
        for tab in ["main", "tab2", "shell", "shell7"] {
            let name = build_session_name("acme", Some("quiet-owl"), tab);
            let parts = parse_session_name(&name, "acme").unwrap();
            assert_eq!(parts.tab_slug, tab);
            assert_eq!(tab_slug_of(&name), Some(tab));
        }
    }

    #[test]
    fn next_tab_slug_agent_sequence() {
        assert_eq!(next_tab_slug(true, &[]), "main");
        assert_eq!(next_tab_slug(true, &["main"]), "tab2");
        assert_eq!(next_tab_slug(true, &["main", "tab2", "shell"]), "tab3");
        assert_eq!(next_tab_slug(true, &["main", "tab3"]), "tab2");
    }

    #[test]
    fn next_tab_slug_shell_sequence() {
        assert_eq!(next_tab_slug(false, &["main"]), "shell");
        assert_eq!(next_tab_slug(false, &["main", "shell"]), "shell2");
    }

    #[test]
    fn next_tab_slug_never_contains_dash() {
        let mut existing: Vec<String> = Vec::new();
        for i in 0..10 {
            let refs: Vec<&str> = existing.iter().map(String::as_str).collect();
            let slug = next_tab_slug(i % 2 == 0, &refs);
            assert!(!slug.contains('-'));
            assert!(!existing.contains(&slug));
            existing.push(slug);
        }
    }

    #[test]
    fn generated_thread_names_are_slugs() {
        let mut rng = StdRng::seed_from_u64(7);
        let name = generate_thread_name(&mut rng, |_| false);
        assert_eq!(slugify(&name), name);
        assert_eq!(name.split('-').count(), 2);
    }

    #[test]
    fn generated_thread_name_avoids_taken_names() {
        let mut rng = StdRng::seed_from_u64(1);
        let first = generate_thread_name(&mut rng, |_| false);
        let mut rng = StdRng::seed_from_u64(1);
        let second = generate_thread_name(&mut rng, |s| s == first);
        assert_ne!(first, second);
    }

    #[test]
    fn generated_thread_name_suffixes_when_everything_collides() {
        let mut rng = StdRng::seed_from_u64(3);
        let name = generate_thread_name(&mut rng, |s| !s.ends_with("-2"));
        assert!(name.ends_with("-2"));
    }
}
