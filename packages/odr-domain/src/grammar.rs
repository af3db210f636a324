//! Text and number search grammar.
//!
//! Bare words are fuzzy contains-matches, quoted words are exact matches, `!` negates the
//! term it touches, `<`, `<=`, `>`, `>=` compare numerically (or as ISO dates) against the
//! comparand written flush against them, whitespace is AND and a bare `OR` is OR. AND binds
//! tighter than OR; there is no grouping.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static ISO_DATE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
	Lt,
	Le,
	Gt,
	Ge,
}
impl CompareOp {
	pub fn as_sql(self) -> &'static str {
		match self {
			Self::Lt => "<",
			Self::Le => "<=",
			Self::Gt => ">",
			Self::Ge => ">=",
		}
	}

	fn holds(self, ordering: std::cmp::Ordering) -> bool {
		match self {
			Self::Lt => ordering.is_lt(),
			Self::Le => ordering.is_le(),
			Self::Gt => ordering.is_gt(),
			Self::Ge => ordering.is_ge(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TermKind {
	Fuzzy { text: String },
	Exact { text: String },
	Compare { op: CompareOp, text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
	pub kind: TermKind,
	pub negated: bool,
}
impl Term {
	pub fn fuzzy(text: impl Into<String>) -> Self {
		Self { kind: TermKind::Fuzzy { text: text.into() }, negated: false }
	}

	pub fn exact(text: impl Into<String>) -> Self {
		Self { kind: TermKind::Exact { text: text.into() }, negated: false }
	}

	pub fn compare(op: CompareOp, text: impl Into<String>) -> Self {
		Self { kind: TermKind::Compare { op, text: text.into() }, negated: false }
	}

	pub fn negate(mut self) -> Self {
		self.negated = !self.negated;

		self
	}

	/// Whether a stored value satisfies the term. Absent values are matched as `""`.
	pub fn matches(&self, value: &str) -> bool {
		let hit = match &self.kind {
			TermKind::Fuzzy { text } => value.to_lowercase().contains(&text.to_lowercase()),
			TermKind::Exact { text } => value.to_lowercase() == text.to_lowercase(),
			TermKind::Compare { op, text } => compare(value, text).is_some_and(|ord| op.holds(ord)),
		};

		hit != self.negated
	}
}

fn compare(value: &str, comparand: &str) -> Option<std::cmp::Ordering> {
	let (value, comparand) = (value.trim(), comparand.trim());

	if let (Ok(left), Ok(right)) = (value.parse::<f64>(), comparand.parse::<f64>()) {
		return left.partial_cmp(&right);
	}
	if ISO_DATE.as_ref().is_some_and(|re| re.is_match(value) && re.is_match(comparand)) {
		return Some(value.cmp(comparand));
	}

	None
}

/// Disjunction of conjunctions, plus the fragments cleanup dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
	pub groups: Vec<Vec<Term>>,
	#[serde(skip)]
	pub discarded: Vec<String>,
}
impl ParsedQuery {
	/// A query without terms matches nothing.
	pub fn is_empty(&self) -> bool {
		self.groups.is_empty()
	}

	pub fn term_count(&self) -> usize {
		self.groups.iter().map(Vec::len).sum()
	}

	pub fn matches(&self, value: &str) -> bool {
		self.groups.iter().any(|group| group.iter().all(|term| term.matches(value)))
	}

	/// Whether a record with no stored value can satisfy the query.
	pub fn matches_empty(&self) -> bool {
		self.matches("")
	}
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	Term(Term),
	Or,
	/// Operator, negation or comparand that cannot form a term.
	Malformed(String),
}

/// Parses `input` in one left-to-right pass, keeping at most `max_terms` terms.
pub fn parse_query(input: &str, max_terms: usize) -> ParsedQuery {
	let mut query = ParsedQuery::default();
	let mut group = Vec::new();
	let mut previous_was_compare = false;
	let mut kept = 0_usize;

	for token in tokenize(input) {
		match token {
			Token::Term(term) => {
				previous_was_compare = matches!(term.kind, TermKind::Compare { .. });

				if kept >= max_terms {
					query.discarded.push(describe(&term));

					continue;
				}

				kept += 1;
				group.push(term);
			},
			Token::Or => {
				// Leading, repeated, or post-comparison connectives carry no meaning.
				if group.is_empty() || previous_was_compare {
					query.discarded.push("OR".to_string());
				} else {
					query.groups.push(std::mem::take(&mut group));
				}

				previous_was_compare = false;
			},
			Token::Malformed(fragment) => {
				query.discarded.push(fragment);
			},
		}
	}

	if !group.is_empty() {
		query.groups.push(group);
	}

	query
}

fn describe(term: &Term) -> String {
	let bang = if term.negated { "!" } else { "" };

	match &term.kind {
		TermKind::Fuzzy { text } => format!("{bang}{text}"),
		TermKind::Exact { text } => format!("{bang}\"{text}\""),
		TermKind::Compare { op, text } => format!("{bang}{}{text}", op.as_sql()),
	}
}

fn tokenize(input: &str) -> Vec<Token> {
	let chars = input.chars().collect::<Vec<_>>();
	let mut tokens = Vec::new();
	let mut idx = 0;

	while idx < chars.len() {
		if chars[idx].is_whitespace() {
			idx += 1;

			continue;
		}

		let start = idx;
		let negated = chars[idx] == '!';

		if negated {
			idx += 1;

			if idx >= chars.len() || chars[idx].is_whitespace() {
				tokens.push(Token::Malformed("!".to_string()));

				continue;
			}
		}

		if matches!(chars[idx], '<' | '>') {
			let op = read_operator(&chars, &mut idx);

			if idx >= chars.len() || chars[idx].is_whitespace() {
				// A detached comparand belongs to the malformed fragment.
				let mut fragment = chars[start..idx].iter().collect::<String>();

				if let Some((end, word)) = peek_word(&chars, idx)
					&& !word.eq_ignore_ascii_case("OR")
				{
					fragment.push(' ');
					fragment.push_str(&word);

					idx = end;
				}

				tokens.push(Token::Malformed(fragment));

				continue;
			}

			let text = read_operand(&chars, &mut idx);
			let term = Term::compare(op, text);

			tokens.push(Token::Term(if negated { term.negate() } else { term }));

			continue;
		}

		if chars[idx] == '"' {
			let text = read_quoted(&chars, &mut idx);
			let term = Term::exact(text);

			tokens.push(Token::Term(if negated { term.negate() } else { term }));

			continue;
		}

		let word = read_bare(&chars, &mut idx);

		if !negated && word.eq_ignore_ascii_case("OR") {
			tokens.push(Token::Or);
		} else {
			let term = Term::fuzzy(word);

			tokens.push(Token::Term(if negated { term.negate() } else { term }));
		}
	}

	tokens
}

fn read_operator(chars: &[char], idx: &mut usize) -> CompareOp {
	let lt = chars[*idx] == '<';

	*idx += 1;

	let inclusive = chars.get(*idx) == Some(&'=');

	if inclusive {
		*idx += 1;
	}

	match (lt, inclusive) {
		(true, false) => CompareOp::Lt,
		(true, true) => CompareOp::Le,
		(false, false) => CompareOp::Gt,
		(false, true) => CompareOp::Ge,
	}
}

fn read_operand(chars: &[char], idx: &mut usize) -> String {
	if chars[*idx] == '"' { read_quoted(chars, idx) } else { read_bare(chars, idx) }
}

/// Reads up to the closing quote; an unterminated quote runs to the end of input.
fn read_quoted(chars: &[char], idx: &mut usize) -> String {
	*idx += 1;

	let start = *idx;

	while *idx < chars.len() && chars[*idx] != '"' {
		*idx += 1;
	}

	let text = chars[start..*idx].iter().collect();

	if *idx < chars.len() {
		*idx += 1;
	}

	text
}

fn read_bare(chars: &[char], idx: &mut usize) -> String {
	let start = *idx;

	while *idx < chars.len() && !chars[*idx].is_whitespace() && chars[*idx] != '"' {
		*idx += 1;
	}

	chars[start..*idx].iter().collect()
}

fn peek_word(chars: &[char], from: usize) -> Option<(usize, String)> {
	let mut idx = from;

	while idx < chars.len() && chars[idx].is_whitespace() {
		idx += 1;
	}

	if idx >= chars.len() {
		return None;
	}

	let word = read_operand(chars, &mut idx);

	Some((idx, word))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detached_comparison_is_discarded() {
		let query = parse_query(r#"a !"b" > 5"#, 32);

		assert_eq!(query.groups, vec![vec![Term::fuzzy("a"), Term::exact("b").negate()]]);
		assert_eq!(query.discarded, vec!["> 5".to_string()]);
	}

	#[test]
	fn or_splits_conjunctions_and_cleanup_drops_stray_connectives() {
		let query = parse_query("OR a b OR OR c OR", 32);

		assert_eq!(query.groups, vec![vec![Term::fuzzy("a"), Term::fuzzy("b")], vec![Term::fuzzy("c")]]);
		assert_eq!(query.discarded.len(), 2);
	}

	#[test]
	fn connective_after_comparison_is_dropped() {
		let query = parse_query(">=10 or x", 32);

		assert_eq!(query.groups, vec![vec![Term::compare(CompareOp::Ge, "10"), Term::fuzzy("x")]]);
	}

	#[test]
	fn comparisons_are_numeric_or_dates() {
		let number = parse_query("<=10", 32);
		let date = parse_query(">2024-01-01", 32);

		assert!(number.matches("9.5"));
		assert!(!number.matches("11"));
		assert!(!number.matches("ten"));
		assert!(date.matches("2024-03-01"));
		assert!(!date.matches("2023-12-31"));
	}

	#[test]
	fn empty_values_follow_term_semantics() {
		assert!(parse_query(r#""""#, 32).matches_empty());
		assert!(!parse_query(r#""x""#, 32).matches_empty());
		assert!(parse_query(r#"!"x""#, 32).matches_empty());
		assert!(!parse_query(r#""x" "y""#, 32).matches_empty());
		assert!(!parse_query("", 32).matches_empty());
	}

	#[test]
	fn fuzzy_and_exact_ignore_case() {
		let query = parse_query(r#"ello OR "WORLD""#, 32);

		assert!(query.matches("Hello there"));
		assert!(query.matches("world"));
		assert!(!query.matches("worlds"));
	}

	#[test]
	fn term_limit_discards_overflow() {
		let query = parse_query("a b c", 2);

		assert_eq!(query.term_count(), 2);
		assert_eq!(query.discarded, vec!["c".to_string()]);
	}
}
