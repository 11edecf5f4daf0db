use std::fmt;

/// One configuration statement: a name, ordered arguments, and an
/// optional nested block. The whole compiler output is a tree of these.
#[derive(Clone, Debug, PartialEq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<Arg>,
    /// Rendered as a `#` line immediately above the directive.
    pub comment: Option<String>,
    pub block: Option<Vec<Directive>>,
}

/// A typed directive argument. The closed set of variants replaces the
/// loosely-typed coercion the old generator did at runtime; anything
/// outside this set fails to compile instead of silently vanishing from
/// the output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arg {
    Str(String),
    Int(i64),
    /// Rendered `on`/`off`.
    Bool(bool),
    /// Rendered with an `s` suffix.
    Seconds(u64),
    /// Rendered with an `m` suffix.
    Minutes(u64),
    /// Flattened in place, one token per element.
    List(Vec<String>),
}

// === impl Directive ===

impl Directive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            comment: None,
            block: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_block(mut self, block: Vec<Directive>) -> Self {
        self.block = Some(block);
        self
    }

    /// A standalone `# text` line.
    pub fn comment(text: impl Into<String>) -> Self {
        Self::new("#").with_comment(text)
    }

    /// A `## start server foo` style section marker. The reload logic in
    /// the proxy container greps for these, so they are load-bearing.
    pub fn marker<I>(words: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::new("##").with_args(words.into_iter().map(|w| Arg::Str(w.into())))
    }

    pub fn is_comment(&self) -> bool {
        self.name == "#"
    }

    /// The rendered argument tokens, list arguments flattened.
    pub fn arg_tokens(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            arg.write_tokens(&mut out);
        }
        out
    }
}

// === impl Arg ===

impl Arg {
    pub fn seconds(v: u64) -> Self {
        Self::Seconds(v)
    }

    pub fn minutes(v: u64) -> Self {
        Self::Minutes(v)
    }

    fn write_tokens(&self, out: &mut Vec<String>) {
        match self {
            Self::Str(s) => out.push(s.clone()),
            Self::Int(i) => out.push(i.to_string()),
            Self::Bool(b) => out.push(if *b { "on" } else { "off" }.to_string()),
            Self::Seconds(v) => out.push(format!("{v}s")),
            Self::Minutes(v) => out.push(format!("{v}m")),
            Self::List(items) => out.extend(items.iter().cloned()),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens = Vec::new();
        self.write_tokens(&mut tokens);
        f.write_str(&tokens.join(" "))
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&String> for Arg {
    fn from(s: &String) -> Self {
        Self::Str(s.clone())
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<String>> for Arg {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<&[String]> for Arg {
    fn from(items: &[String]) -> Self {
        Self::List(items.to_vec())
    }
}

macro_rules! arg_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(v: $ty) -> Self {
                    Self::Int(v as i64)
                }
            }
        )*
    };
}

arg_from_int!(i32, i64, u16, u32, u64, usize);

/// Builds a [`Directive`] from a name and any arguments convertible to
/// [`Arg`].
macro_rules! directive {
    ($name:expr $(, $arg:expr)* $(,)?) => {
        $crate::directive::Directive::new($name)$(.arg($arg))*
    };
}

/// Builds a block [`Directive`]: name, bracketed arguments, children.
macro_rules! block {
    ($name:expr, [$($arg:expr),* $(,)?], $children:expr $(,)?) => {
        $crate::directive::Directive::new($name)$(.arg($arg))*.with_block($children)
    };
}

pub(crate) use {block, directive};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_coercion() {
        let d = directive!(
            "example",
            "plain",
            42u32,
            true,
            false,
            Arg::seconds(5),
            Arg::minutes(30),
            vec!["a".to_string(), "b".to_string()],
        );
        assert_eq!(
            d.arg_tokens(),
            vec!["plain", "42", "on", "off", "5s", "30m", "a", "b"]
        );
    }

    #[test]
    fn list_flattens_in_place() {
        let d = directive!("resolver", vec!["10.0.0.2".to_string()], "valid=30s");
        assert_eq!(d.arg_tokens(), vec!["10.0.0.2", "valid=30s"]);
    }

    #[test]
    fn block_nests_children() {
        let d = block!("events", [], vec![directive!("worker_connections", 16384u32)]);
        assert_eq!(d.name, "events");
        let block = d.block.as_ref().unwrap();
        assert_eq!(block.len(), 1);
        assert_eq!(block[0].name, "worker_connections");
    }

    #[test]
    fn comment_markers() {
        assert!(Directive::comment("Ratelimit foo").is_comment());
        let m = Directive::marker(["start", "server", "example.com"]);
        assert_eq!(m.name, "##");
        assert_eq!(m.arg_tokens(), vec!["start", "server", "example.com"]);
    }
}
