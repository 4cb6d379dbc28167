/// Topic keys, window visibility and per-registration scene defaults
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// The set of topics a single pipeline registration listens on.
///
/// Identity is the set of topic strings: `"a"` and `["a"]` are the same key,
/// and so are `["a", "b"]` and `["b", "a"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TopicSpec {
    topics: BTreeSet<String>,
}

impl TopicSpec {
    /// Builds a spec from any list of topics. Returns `None` when the list is empty.
    pub fn new<I, S>(topics: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: BTreeSet<String> = topics.into_iter().map(Into::into).collect();
        if topics.is_empty() {
            return None;
        }
        Some(Self { topics })
    }

    pub fn single(topic: impl Into<String>) -> Self {
        Self {
            topics: BTreeSet::from([topic.into()]),
        }
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl From<&str> for TopicSpec {
    fn from(topic: &str) -> Self {
        Self::single(topic)
    }
}

impl From<String> for TopicSpec {
    fn from(topic: String) -> Self {
        Self::single(topic)
    }
}

/// Arrays must be non-empty; an empty one fails to compile.
///
/// ```compile_fail
/// use topicscene::core::topic::TopicSpec;
/// let _ = TopicSpec::from([] as [&str; 0]);
/// ```
impl<const N: usize> From<[&str; N]> for TopicSpec {
    fn from(topics: [&str; N]) -> Self {
        const { assert!(N > 0, "a TopicSpec needs at least one topic") };
        Self {
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl fmt::Display for TopicSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.topics().collect();
        if joined.len() == 1 {
            write!(f, "{}", joined[0])
        } else {
            write!(f, "[{}]", joined.join(", "))
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

impl<'de> Deserialize<'de> for TopicSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let topics = OneOrMany::<String>::deserialize(deserializer)?.into_vec();
        TopicSpec::new(topics).ok_or_else(|| serde::de::Error::custom("topic list is empty"))
    }
}

/// Which windows a registration is shown in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WindowFilter {
    #[default]
    All,
    Single(u32),
    Set(BTreeSet<u32>),
}

impl WindowFilter {
    pub fn is_visible_in(&self, window_index: u32) -> bool {
        match self {
            WindowFilter::All => true,
            WindowFilter::Single(index) => *index == window_index,
            WindowFilter::Set(indices) => indices.contains(&window_index),
        }
    }
}

impl fmt::Display for WindowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowFilter::All => write!(f, "all windows"),
            WindowFilter::Single(index) => write!(f, "window {index}"),
            WindowFilter::Set(indices) => {
                let list: Vec<String> = indices.iter().map(u32::to_string).collect();
                write!(f, "windows [{}]", list.join(", "))
            }
        }
    }
}

impl<'de> Deserialize<'de> for WindowFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match OneOrMany::<u32>::deserialize(deserializer)? {
            OneOrMany::One(index) => WindowFilter::Single(index),
            OneOrMany::Many(indices) => WindowFilter::Set(indices.into_iter().collect()),
        })
    }
}

/// RGB colour used by scene visuals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const WHITE: Rgb = Rgb(255, 255, 255);
    pub const LIGHT_GRAY: Rgb = Rgb(192, 192, 192);
    pub const BLUE: Rgb = Rgb(0, 0, 255);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxesOptions {
    pub length: f32,
    pub thickness: f32,
    pub show: bool,
}

impl Default for AxesOptions {
    fn default() -> Self {
        Self {
            length: 1.0,
            thickness: 0.02,
            show: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridOptions {
    pub size: u32,
    pub spacing: f32,
    pub thickness: f32,
    pub color: Rgb,
    pub show: bool,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            size: 10,
            spacing: 1.0,
            thickness: 0.01,
            color: Rgb::LIGHT_GRAY,
            show: true,
        }
    }
}

/// Axes/grid visuals a registration asks for. Unset parts leave the scene untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDefaults {
    #[serde(default)]
    pub axes: Option<AxesOptions>,
    #[serde(default)]
    pub grid: Option<GridOptions>,
}

impl SceneDefaults {
    pub fn is_empty(&self) -> bool {
        self.axes.is_none() && self.grid.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(spec: &TopicSpec) -> u64 {
        let mut hasher = DefaultHasher::new();
        spec.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn single_string_and_one_element_list_are_the_same_key() {
        let a = TopicSpec::from("a");
        let b = TopicSpec::new(vec!["a".to_string()]).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn topic_order_does_not_matter() {
        assert_eq!(TopicSpec::from(["a", "b"]), TopicSpec::from(["b", "a"]));
        assert_ne!(TopicSpec::from(["a", "b"]), TopicSpec::from("a"));
    }

    #[test]
    fn empty_topic_list_is_rejected() {
        assert!(TopicSpec::new(Vec::<String>::new()).is_none());
    }

    #[test]
    fn array_specs_are_never_empty() {
        let repeated = TopicSpec::from(["a", "a"]);
        assert_eq!(repeated.len(), 1);
        assert!(!repeated.is_empty());
        assert_eq!(repeated, TopicSpec::from("a"));
    }

    #[derive(Deserialize)]
    struct Entry {
        topic: TopicSpec,
        #[serde(default)]
        windows: WindowFilter,
    }

    #[test]
    fn deserializes_string_or_sequence() {
        let one: Entry = toml::from_str(r#"topic = "x""#).unwrap();
        let many: Entry = toml::from_str(r#"topic = ["x"]"#).unwrap();
        assert_eq!(one.topic, many.topic);
        assert_eq!(one.windows, WindowFilter::All);

        let empty = toml::from_str::<Entry>(r#"topic = []"#);
        assert!(empty.is_err());
    }

    #[test]
    fn window_filter_visibility() {
        let single: Entry = toml::from_str("topic = \"x\"\nwindows = 1").unwrap();
        assert!(single.windows.is_visible_in(1));
        assert!(!single.windows.is_visible_in(0));

        let set: Entry = toml::from_str("topic = \"x\"\nwindows = [0, 2]").unwrap();
        assert!(set.windows.is_visible_in(0));
        assert!(set.windows.is_visible_in(2));
        assert!(!set.windows.is_visible_in(1));

        assert!(WindowFilter::All.is_visible_in(42));
    }

    #[test]
    fn display_matches_encoding() {
        assert_eq!(TopicSpec::from("apriltag/tag").to_string(), "apriltag/tag");
        assert_eq!(TopicSpec::from(["b", "a"]).to_string(), "[a, b]");
    }
}
