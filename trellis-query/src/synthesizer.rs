//! Response synthesis.
//!
//! [`ResponseSynthesizer`] turns retrieved nodes into answer text under the prompt
//! budget of its [`ServiceContext`]. The [`ResponseMode`] chooses how many LLM calls
//! that takes:
//!
//! | mode | calls |
//! |---|---|
//! | `default` | one per chunk, answering then refining |
//! | `compact` | one per packed chunk, answering then refining |
//! | `tree_summarize` | one per packed chunk per round, until one summary remains |
//! | `simple_summarize` | one, over truncated texts |
//! | `generation` | one, ignoring the nodes |
//! | `no_text` | none |

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use tracing::{debug, info, instrument};

use trellis_core::prompt_helper::PLAIN_TEXT_PADDING;
use trellis_core::prompts::{
    PromptTemplate, PromptType, PromptVars, default_prompt, prompt_vars, tree_summarize_prompt,
};
use trellis_core::{QueryBundle, Response, Result, ScoredNode, ServiceContext, StreamingResponse, TrellisError};

/// Metadata key recording the mode a response was synthesized with.
pub const RESPONSE_MODE_KEY: &str = "response_mode";

/// How retrieved text is folded into an answer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseMode {
    /// Answer from the first chunk, refine with each following chunk.
    #[default]
    Default,
    /// Pack chunks as tightly as the window allows, then refine.
    Compact,
    /// Summarize packed chunks round by round until one remains.
    TreeSummarize,
    /// One call over every text truncated to its share of the window.
    SimpleSummarize,
    /// Answer from the model alone.
    Generation,
    /// Return the nodes without calling the model.
    NoText,
}

impl ResponseMode {
    fn supports_streaming(self) -> bool {
        matches!(self, Self::Generation | Self::SimpleSummarize)
    }
}

/// Builds answers from nodes with an LLM.
#[derive(Debug, Clone)]
pub struct ResponseSynthesizer {
    service_context: ServiceContext,
    response_mode: ResponseMode,
    text_qa_template: PromptTemplate,
    refine_template: PromptTemplate,
    summary_template: PromptTemplate,
    simple_template: PromptTemplate,
    use_async: bool,
    verbose: bool,
}

impl ResponseSynthesizer {
    /// Create a synthesizer with the default templates and mode.
    pub fn new(service_context: ServiceContext) -> Self {
        Self {
            service_context,
            response_mode: ResponseMode::Default,
            text_qa_template: default_prompt(PromptType::QuestionAnswer),
            refine_template: default_prompt(PromptType::Refine),
            summary_template: tree_summarize_prompt(),
            simple_template: default_prompt(PromptType::SimpleInput),
            use_async: false,
            verbose: false,
        }
    }

    /// Set the response mode.
    #[must_use]
    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    /// Template for the first answer. Variables: `context_str`, `query_str`.
    #[must_use]
    pub fn with_text_qa_template(mut self, template: PromptTemplate) -> Self {
        self.text_qa_template = template;
        self
    }

    /// Template for refinement. Variables: `query_str`, `existing_answer`, `context_msg`.
    #[must_use]
    pub fn with_refine_template(mut self, template: PromptTemplate) -> Self {
        self.refine_template = template;
        self
    }

    /// Template for tree summarize rounds. Variables: `context_str`, `query_str`.
    #[must_use]
    pub fn with_summary_template(mut self, template: PromptTemplate) -> Self {
        self.summary_template = template;
        self
    }

    /// Summarize tree rounds concurrently even on the sequential path.
    #[must_use]
    pub fn with_use_async(mut self, use_async: bool) -> Self {
        self.use_async = use_async;
        self
    }

    /// Log intermediate answers at info level.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Configured response mode.
    pub fn response_mode(&self) -> ResponseMode {
        self.response_mode
    }

    /// The services this synthesizer calls.
    pub fn service_context(&self) -> &ServiceContext {
        &self.service_context
    }

    /// Synthesize, awaiting every LLM call in sequence.
    ///
    /// The response cites `nodes` followed by `additional_source_nodes`.
    #[instrument(skip_all, fields(mode = %self.response_mode, nodes = nodes.len()))]
    pub async fn synthesize(
        &self,
        query: &QueryBundle,
        nodes: Vec<ScoredNode>,
        additional_source_nodes: Vec<ScoredNode>,
    ) -> Result<Response> {
        let texts = node_texts(&nodes);
        let answer = self.get_response(&query.query_str, texts, self.use_async).await?;
        Ok(self.build_response(answer, nodes, additional_source_nodes))
    }

    /// Synthesize, running independent LLM calls concurrently.
    #[instrument(skip_all, fields(mode = %self.response_mode, nodes = nodes.len()))]
    pub async fn asynthesize(
        &self,
        query: &QueryBundle,
        nodes: Vec<ScoredNode>,
        additional_source_nodes: Vec<ScoredNode>,
    ) -> Result<Response> {
        let texts = node_texts(&nodes);
        let answer = self.get_response(&query.query_str, texts, true).await?;
        Ok(self.build_response(answer, nodes, additional_source_nodes))
    }

    /// Synthesize with the answer streamed as it is generated.
    ///
    /// Only `generation` and `simple_summarize` stream; other modes are a validation
    /// error.
    pub async fn synthesize_streaming(
        &self,
        query: &QueryBundle,
        nodes: Vec<ScoredNode>,
        additional_source_nodes: Vec<ScoredNode>,
    ) -> Result<StreamingResponse> {
        if !self.response_mode.supports_streaming() {
            return Err(TrellisError::validation(format!(
                "response mode '{}' does not support streaming",
                self.response_mode
            )));
        }
        let (template, vars) = match self.response_mode {
            ResponseMode::Generation => (
                &self.simple_template,
                prompt_vars([("query_str", query.query_str.as_str())]),
            ),
            _ => {
                let context = self.simple_summarize_context(&query.query_str, &node_texts(&nodes))?;
                (
                    &self.text_qa_template,
                    prompt_vars([("query_str", query.query_str.clone()), ("context_str", context)]),
                )
            }
        };
        let response_stream = self.service_context.stream(template, &vars).await?;
        let mut source_nodes = nodes;
        source_nodes.extend(additional_source_nodes);
        Ok(StreamingResponse {
            response_stream,
            source_nodes,
        })
    }

    fn build_response(
        &self,
        answer: Option<String>,
        nodes: Vec<ScoredNode>,
        additional_source_nodes: Vec<ScoredNode>,
    ) -> Response {
        let mut source_nodes = nodes;
        source_nodes.extend(additional_source_nodes);
        Response::new(answer, source_nodes)
            .with_metadata(RESPONSE_MODE_KEY, self.response_mode.as_ref())
    }

    async fn get_response(
        &self,
        query_str: &str,
        texts: Vec<String>,
        concurrent: bool,
    ) -> Result<Option<String>> {
        let answer = match self.response_mode {
            ResponseMode::NoText => return Ok(None),
            ResponseMode::Generation => {
                self.predict(&self.simple_template, prompt_vars([("query_str", query_str)]))
                    .await?
            }
            ResponseMode::Default => self.refine_over(query_str, texts).await?,
            ResponseMode::Compact => {
                let qa = self.text_qa_template.partial_format(&query_vars(query_str));
                let packed = self
                    .service_context
                    .prompt_helper()
                    .compact_text_chunks(&qa, &texts)?;
                debug!(before = texts.len(), after = packed.len(), "Compacted text chunks");
                self.refine_over(query_str, packed).await?
            }
            ResponseMode::TreeSummarize => self.tree_summarize(query_str, &texts, concurrent).await?,
            ResponseMode::SimpleSummarize => {
                let context = self.simple_summarize_context(query_str, &texts)?;
                self.predict(
                    &self.text_qa_template,
                    prompt_vars([("query_str", query_str.to_string()), ("context_str", context)]),
                )
                .await?
            }
        };
        Ok(Some(answer))
    }

    async fn predict(&self, template: &PromptTemplate, vars: PromptVars) -> Result<String> {
        let answer = self.service_context.predict(template, &vars).await?;
        if self.verbose {
            info!(prompt_type = %template.prompt_type(), answer = %answer, "LLM answer");
        }
        Ok(answer)
    }

    /// Answer from the first text, refine with the rest. No texts means one call with an
    /// empty context.
    async fn refine_over(&self, query_str: &str, texts: Vec<String>) -> Result<String> {
        let texts = if texts.is_empty() { vec![String::new()] } else { texts };
        let mut answer: Option<String> = None;
        for text in texts {
            answer = Some(match answer {
                None => self.give_response_single(query_str, &text).await?,
                Some(existing) => self.refine_response_single(query_str, existing, &text).await?,
            });
        }
        answer.ok_or_else(|| TrellisError::internal("refine produced no answer"))
    }

    async fn give_response_single(&self, query_str: &str, text: &str) -> Result<String> {
        let qa = self.text_qa_template.partial_format(&query_vars(query_str));
        let splitter = self
            .service_context
            .prompt_helper()
            .get_text_splitter_given_prompt(&qa, 1, PLAIN_TEXT_PADDING)?;
        let mut chunks = splitter.split_text(text);
        if chunks.is_empty() {
            chunks.push(String::new());
        }
        let mut chunks = chunks.into_iter();
        let first = chunks.next().unwrap_or_default();
        let mut answer = self
            .predict(
                &self.text_qa_template,
                prompt_vars([("query_str", query_str.to_string()), ("context_str", first)]),
            )
            .await?;
        for chunk in chunks {
            answer = self.refine_response_single(query_str, answer, &chunk).await?;
        }
        Ok(answer)
    }

    async fn refine_response_single(
        &self,
        query_str: &str,
        existing_answer: String,
        text: &str,
    ) -> Result<String> {
        let refine = self.refine_template.partial_format(&prompt_vars([
            ("query_str", query_str),
            ("existing_answer", existing_answer.as_str()),
        ]));
        let splitter = self
            .service_context
            .prompt_helper()
            .get_text_splitter_given_prompt(&refine, 1, PLAIN_TEXT_PADDING)?;
        let mut answer = existing_answer;
        for chunk in splitter.split_text(text) {
            answer = self
                .predict(
                    &self.refine_template,
                    prompt_vars([
                        ("query_str", query_str.to_string()),
                        ("existing_answer", answer),
                        ("context_msg", chunk),
                    ]),
                )
                .await?;
        }
        Ok(answer)
    }

    async fn tree_summarize(&self, query_str: &str, texts: &[String], concurrent: bool) -> Result<String> {
        let template = self.summary_template.partial_format(&query_vars(query_str));
        let helper = self.service_context.prompt_helper();
        let mut chunks = helper.compact_text_chunks(&template, texts)?;
        let mut round = 0usize;
        loop {
            if chunks.len() <= 1 {
                let context = chunks.pop().unwrap_or_default();
                return self
                    .predict(
                        &self.summary_template,
                        prompt_vars([("query_str", query_str.to_string()), ("context_str", context)]),
                    )
                    .await;
            }
            round += 1;
            debug!(round, chunks = chunks.len(), concurrent, "Tree summarize round");
            let summaries = if concurrent {
                try_join_all(chunks.iter().map(|chunk| {
                    self.predict(
                        &self.summary_template,
                        prompt_vars([("query_str", query_str), ("context_str", chunk.as_str())]),
                    )
                }))
                .await?
            } else {
                let mut summaries = Vec::with_capacity(chunks.len());
                for chunk in &chunks {
                    summaries.push(
                        self.predict(
                            &self.summary_template,
                            prompt_vars([("query_str", query_str), ("context_str", chunk.as_str())]),
                        )
                        .await?,
                    );
                }
                summaries
            };
            let next = helper.compact_text_chunks(&template, &summaries)?;
            if next.len() >= chunks.len() {
                return Err(TrellisError::configuration(format!(
                    "tree summarize made no progress in round {round}: {} chunks did not shrink",
                    chunks.len()
                )));
            }
            chunks = next;
        }
    }

    fn simple_summarize_context(&self, query_str: &str, texts: &[String]) -> Result<String> {
        let qa = self.text_qa_template.partial_format(&query_vars(query_str));
        let truncated = self
            .service_context
            .prompt_helper()
            .truncate_texts(&qa, texts)?;
        Ok(truncated.join("\n"))
    }
}

fn query_vars(query_str: &str) -> PromptVars {
    prompt_vars([("query_str", query_str)])
}

fn node_texts(nodes: &[ScoredNode]) -> Vec<String> {
    nodes.iter().map(|n| n.text().to_string()).collect()
}
