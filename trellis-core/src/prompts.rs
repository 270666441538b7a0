//! Prompt templates.
//!
//! Templates use `{name}` placeholders. Formatting fails on a placeholder without a
//! value; [`PromptTemplate::scaffold`] blanks every placeholder so callers can count
//! the fixed tokens a prompt costs before any data is inserted.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;

use crate::error::{Result, TrellisError};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid"));

/// Values substituted into a template.
pub type PromptVars = BTreeMap<String, String>;

/// Build [`PromptVars`] from `(name, value)` pairs.
pub fn prompt_vars<I, K, V>(pairs: I) -> PromptVars
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// What a template is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PromptType {
    /// Summarize a context.
    Summary,
    /// Pick one child in a tree.
    TreeSelect,
    /// Pick several children in a tree.
    TreeSelectMultiple,
    /// Answer a question from context.
    QuestionAnswer,
    /// Refine an existing answer with more context.
    Refine,
    /// Extract keywords from text.
    KeywordExtract,
    /// Extract keywords from a question.
    QueryKeywordExtract,
    /// Translate a question into a structured query.
    TextToSql,
    /// Pass the query through.
    SimpleInput,
    /// Rewrite a query into a sub-question.
    Decompose,
    /// Write a hypothetical answer document.
    Hyde,
    /// Anything else.
    Custom,
}

/// A template with `{placeholder}` variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    template: String,
    prompt_type: PromptType,
    #[serde(default)]
    partial_vars: PromptVars,
}

impl PromptTemplate {
    /// Create a template.
    pub fn new<S: Into<String>>(template: S, prompt_type: PromptType) -> Self {
        Self {
            template: template.into(),
            prompt_type,
            partial_vars: PromptVars::new(),
        }
    }

    /// Raw template text.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Template purpose.
    pub fn prompt_type(&self) -> PromptType {
        self.prompt_type
    }

    /// Placeholder names in order of first appearance, excluding partially bound ones.
    pub fn input_variables(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for cap in PLACEHOLDER.captures_iter(&self.template) {
            let name = &cap[1];
            if !self.partial_vars.contains_key(name) && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Bind some variables now; the rest are supplied at format time.
    #[must_use]
    pub fn partial_format(&self, vars: &PromptVars) -> Self {
        let mut partial = self.clone();
        partial
            .partial_vars
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        partial
    }

    fn render(&self, vars: &PromptVars, blank_missing: bool) -> Result<String> {
        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(&self.template, |cap: &regex::Captures<'_>| {
            let name = &cap[1];
            if let Some(value) = vars.get(name).or_else(|| self.partial_vars.get(name)) {
                value.clone()
            } else if blank_missing {
                String::new()
            } else {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        });
        match missing {
            Some(name) => Err(TrellisError::validation(format!(
                "missing prompt variable '{name}' for {} prompt",
                self.prompt_type
            ))),
            None => Ok(rendered.into_owned()),
        }
    }

    /// Render with every placeholder bound.
    pub fn format(&self, vars: &PromptVars) -> Result<String> {
        self.render(vars, false)
    }

    /// Render with unbound placeholders replaced by empty strings.
    pub fn scaffold(&self) -> String {
        // blank_missing never reports a missing variable
        self.render(&PromptVars::new(), true).unwrap_or_default()
    }
}

/// Summarize a context block.
pub const DEFAULT_SUMMARY_PROMPT_TMPL: &str = "Write a summary of the following. Try to use only the \
information provided. Try to include as many key details as possible.\n\n\n{context_str}\n\n\nSUMMARY:\"\"\"\n";

/// Pick one numbered choice.
pub const DEFAULT_QUERY_PROMPT_TMPL: &str = "Some choices are given below. It is provided in a numbered list \
(1 to {num_chunks}), where each item in the list corresponds to a summary.\n---------------------\n\
{context_list}\n---------------------\nUsing only the choices above and not prior knowledge, return the choice \
that is most relevant to the question: '{query_str}'\nProvide choice in the following format: 'ANSWER: <number>' \
and explain why this summary was selected in relation to the question.\n";

/// Pick up to `branching_factor` numbered choices.
pub const DEFAULT_QUERY_PROMPT_MULTIPLE_TMPL: &str = "Some choices are given below. It is provided in a numbered \
list (1 to {num_chunks}), where each item in the list corresponds to a summary.\n---------------------\n\
{context_list}\n---------------------\nUsing only the choices above and not prior knowledge, return the top choices \
(no more than {branching_factor}, ranked by most relevant to least) that are most relevant to the question: \
'{query_str}'\nProvide choices in the following format: 'ANSWER: <numbers>' and explain why these summaries were \
selected in relation to the question.\n";

/// Answer from context.
pub const DEFAULT_TEXT_QA_PROMPT_TMPL: &str = "Context information is below. \n---------------------\n\
{context_str}\n---------------------\nGiven the context information and not prior knowledge, answer the \
question: {query_str}\n";

/// Refine an answer.
pub const DEFAULT_REFINE_PROMPT_TMPL: &str = "The original question is as follows: {query_str}\nWe have provided \
an existing answer: {existing_answer}\nWe have the opportunity to refine the existing answer (only if needed) \
with some more context below.\n------------\n{context_msg}\n------------\nGiven the new context, refine the \
original answer to better answer the question. If the context isn't useful, return the original answer.";

/// Combine summaries from several sources into an answer.
pub const DEFAULT_TREE_SUMMARIZE_TMPL: &str = "Context information from multiple sources is below.\n\
---------------------\n{context_str}\n---------------------\nGiven the information from multiple sources and \
not prior knowledge, answer the query.\nQuery: {query_str}\nAnswer: ";

/// Keywords from text.
pub const DEFAULT_KEYWORD_EXTRACT_TEMPLATE_TMPL: &str = "Some text is provided below. Given the text, extract up \
to {max_keywords} keywords from the text. Avoid stopwords.\n---------------------\n{text}\n\
---------------------\nProvide keywords in the following comma-separated format: 'KEYWORDS: <keywords>'\n";

/// Keywords from a question.
pub const DEFAULT_QUERY_KEYWORD_EXTRACT_TEMPLATE_TMPL: &str = "A question is provided below. Given the question, \
extract up to {max_keywords} keywords from the text. Focus on extracting the keywords that we can use to best \
lookup answers to the question. Avoid stopwords.\n---------------------\n{question}\n---------------------\n\
Provide keywords in the following comma-separated format: 'KEYWORDS: <keywords>'\n";

/// Question to structured query.
pub const DEFAULT_TEXT_TO_SQL_TMPL: &str = "Given an input question, first create a syntactically correct \
{dialect} query to run, then look at the results of the query and return the answer. Pay attention to use only \
the column names that you can see in the schema description. Be careful to not query for columns that do not \
exist.\nUse the following format:\nQuestion: Question here\nSQLQuery: SQL Query to run\nOnly use the tables \
listed below.\n{schema}\n{context}\nQuestion: {query_str}\nSQLQuery: ";

/// Pure generation.
pub const DEFAULT_SIMPLE_INPUT_TMPL: &str = "{query_str}";

/// Hypothetical document for HyDE.
pub const DEFAULT_HYDE_PROMPT_TMPL: &str = "Please write a passage to answer the question\nTry to include as \
many key details as possible.\n\n\n{context_str}\n\n\nPassage:\"\"\"\n";

/// Single decomposition step.
pub const DEFAULT_DECOMPOSE_QUERY_TRANSFORM_TMPL: &str = "The original question is as follows: {query_str}\nWe \
have an opportunity to answer some, or all of the question from a knowledge source. Context information for the \
knowledge source is provided below. \nGiven the context, return a new question that can be answered from the \
context. The question can be the same as the original question, or a new question that represents a \
subcomponent of the overall question.\nQuestion: {query_str}\nKnowledge source context: {context_str}\nNew \
question: ";

/// Multi-step decomposition step.
pub const DEFAULT_STEP_DECOMPOSE_QUERY_TRANSFORM_TMPL: &str = "The original question is as follows: \
{query_str}\nWe have an opportunity to answer some, or all of the question from a knowledge source. Context \
information for the knowledge source is provided below, as well as previous reasoning steps.\nGiven the context \
and previous reasoning, return a question that can be answered from the context. This question can be the same \
as the original question, or this question can represent a subcomponent of the overall question. It should not \
be irrelevant to the original question.\nIf we cannot extract more information from the context, provide 'None' \
as the answer.\nQuestion: {query_str}\nKnowledge source context: {context_str}\nPrevious reasoning: \
{prev_reasoning}\nNew question: ";

/// Built-in template for a purpose.
pub fn default_prompt(prompt_type: PromptType) -> PromptTemplate {
    let template = match prompt_type {
        PromptType::Summary => DEFAULT_SUMMARY_PROMPT_TMPL,
        PromptType::TreeSelect => DEFAULT_QUERY_PROMPT_TMPL,
        PromptType::TreeSelectMultiple => DEFAULT_QUERY_PROMPT_MULTIPLE_TMPL,
        PromptType::QuestionAnswer => DEFAULT_TEXT_QA_PROMPT_TMPL,
        PromptType::Refine => DEFAULT_REFINE_PROMPT_TMPL,
        PromptType::KeywordExtract => DEFAULT_KEYWORD_EXTRACT_TEMPLATE_TMPL,
        PromptType::QueryKeywordExtract => DEFAULT_QUERY_KEYWORD_EXTRACT_TEMPLATE_TMPL,
        PromptType::TextToSql => DEFAULT_TEXT_TO_SQL_TMPL,
        PromptType::SimpleInput | PromptType::Custom => DEFAULT_SIMPLE_INPUT_TMPL,
        PromptType::Decompose => DEFAULT_DECOMPOSE_QUERY_TRANSFORM_TMPL,
        PromptType::Hyde => DEFAULT_HYDE_PROMPT_TMPL,
    };
    PromptTemplate::new(template, prompt_type)
}

/// Template that combines summaries in tree summarize mode.
pub fn tree_summarize_prompt() -> PromptTemplate {
    PromptTemplate::new(DEFAULT_TREE_SUMMARIZE_TMPL, PromptType::Summary)
}

/// Template for the multi-step decomposition transform.
pub fn step_decompose_prompt() -> PromptTemplate {
    PromptTemplate::new(DEFAULT_STEP_DECOMPOSE_QUERY_TRANSFORM_TMPL, PromptType::Decompose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_and_missing_variable() {
        let prompt = PromptTemplate::new("Q: {query_str}\nC: {context_str}", PromptType::Custom);
        assert_eq!(prompt.input_variables(), vec!["query_str", "context_str"]);

        let text = prompt
            .format(&prompt_vars([("query_str", "why"), ("context_str", "because")]))
            .unwrap();
        assert_eq!(text, "Q: why\nC: because");

        let err = prompt.format(&prompt_vars([("query_str", "why")])).unwrap_err();
        assert!(err.to_string().contains("context_str"));
    }

    #[test]
    fn test_partial_format_binds_early() {
        let prompt = default_prompt(PromptType::QuestionAnswer)
            .partial_format(&prompt_vars([("query_str", "what?")]));
        assert_eq!(prompt.input_variables(), vec!["context_str"]);
        let text = prompt.format(&prompt_vars([("context_str", "ctx")])).unwrap();
        assert!(text.contains("answer the question: what?"));
    }

    #[test]
    fn test_scaffold_blanks_placeholders() {
        let prompt = PromptTemplate::new("[{a}] and [{b}]", PromptType::Custom)
            .partial_format(&prompt_vars([("a", "x")]));
        assert_eq!(prompt.scaffold(), "[x] and []");
    }
}
