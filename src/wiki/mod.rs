//! Wiki generation producers.
//!
//! Builds the event streams that the task runner drives: plan an outline for
//! the repository, then generate each page as a content chunk. Every
//! outbound call goes through the dispatcher, never to the provider
//! directly, so rate-limit rotation applies uniformly.
//!
//! Retrieval context (chunking, embeddings, similarity search) is an
//! external collaborator; the producers here work from the repository
//! coordinates they are given.

use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use tracing::debug;

use crate::error::GenerationError;
use crate::jobs::{JobEvent, PageRef};
use crate::llm::providers::{ChatRequest, GenerationProvider, Message};
use crate::llm::Dispatcher;

/// Kind of generation work, the first component of a job key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Full wiki generation for a repository.
    Wiki,
    /// One-off question answered against a repository.
    Ask,
}

impl JobKind {
    fn as_str(&self) -> &'static str {
        match self {
            JobKind::Wiki => "wiki",
            JobKind::Ask => "ask",
        }
    }
}

/// Derive the stable job key for a unit of work.
///
/// Identical requests map to the same key, which is what lets the registry
/// collapse them onto one running job.
pub fn job_key(kind: JobKind, owner: &str, repo: &str) -> String {
    format!("{}:{}/{}", kind.as_str(), owner, repo)
}

/// System prompt shared by the wiki producers.
const SYSTEM_PROMPT: &str = "You are a senior engineer writing factual, well-structured \
documentation for a source repository. Answer in Markdown. Do not invent APIs or files.";

/// Builds generation event streams for repositories.
#[derive(Clone)]
pub struct WikiGenerator {
    provider: Arc<dyn GenerationProvider>,
    dispatcher: Dispatcher,
    model: String,
}

impl WikiGenerator {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        dispatcher: Dispatcher,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            model: model.into(),
        }
    }

    /// Event stream for a full wiki run: outline first, then one chunk per
    /// page, closed by the terminal marker.
    pub fn wiki_stream(
        &self,
        owner: &str,
        repo: &str,
    ) -> impl Stream<Item = Result<JobEvent, GenerationError>> + Send + 'static {
        let generator = self.clone();
        let owner = owner.to_string();
        let repo = repo.to_string();

        stream! {
            yield Ok(JobEvent::status(format!("planning wiki for {owner}/{repo}")));

            let pages = match generator.plan_outline(&owner, &repo).await {
                Ok(pages) => pages,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            yield Ok(JobEvent::Outline { pages: pages.clone() });

            for page in &pages {
                yield Ok(JobEvent::status(format!("generating page '{}'", page.title)));
                match generator.generate_page(&owner, &repo, page).await {
                    Ok(content) => yield Ok(JobEvent::chunk(content)),
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }

            yield Ok(JobEvent::Done);
        }
    }

    /// Event stream answering a single question about a repository.
    pub fn answer_stream(
        &self,
        owner: &str,
        repo: &str,
        question: &str,
    ) -> impl Stream<Item = Result<JobEvent, GenerationError>> + Send + 'static {
        let generator = self.clone();
        let owner = owner.to_string();
        let repo = repo.to_string();
        let question = question.to_string();

        stream! {
            yield Ok(JobEvent::status(format!("answering question about {owner}/{repo}")));

            let prompt = format!(
                "Answer the following question about the repository {owner}/{repo}.\n\n\
                 Question: {question}"
            );
            match generator.complete(&prompt).await {
                Ok(content) => yield Ok(JobEvent::chunk(content)),
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }

            yield Ok(JobEvent::Done);
        }
    }

    /// Ask the model for the page plan and parse it into page references.
    async fn plan_outline(&self, owner: &str, repo: &str) -> Result<Vec<PageRef>, GenerationError> {
        let prompt = format!(
            "List the wiki pages a reader would need to understand the repository \
             {owner}/{repo}. Reply with one page title per line, 4 to 8 lines, no numbering."
        );
        let raw = self.complete(&prompt).await?;
        let pages = parse_outline(&raw);
        debug!(owner, repo, pages = pages.len(), "planned wiki outline");
        if pages.is_empty() {
            return Err(GenerationError::producer("outline came back empty"));
        }
        Ok(pages)
    }

    /// Generate the body of one wiki page.
    async fn generate_page(
        &self,
        owner: &str,
        repo: &str,
        page: &PageRef,
    ) -> Result<String, GenerationError> {
        let prompt = format!(
            "Write the wiki page \"{}\" for the repository {owner}/{repo}. \
             Start with a level-1 heading.",
            page.title
        );
        self.complete(&prompt).await
    }

    /// One dispatched completion call.
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = ChatRequest::new(
            &self.model,
            vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)],
        );

        let response = self
            .dispatcher
            .execute(|credential| {
                let provider = Arc::clone(&self.provider);
                let request = request.clone();
                async move { provider.generate(&credential, request).await }
            })
            .await?;
        Ok(response.content)
    }
}

/// Parse an outline response into page references, one per non-empty line.
///
/// Tolerates bullet and numbering prefixes the model may add despite
/// instructions.
fn parse_outline(raw: &str) -> Vec<PageRef> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
        })
        .filter(|title| !title.is_empty())
        .map(|title| PageRef::new(slugify(title), title))
        .collect()
}

/// Lowercase, alphanumeric-and-dashes page id.
fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::llm::providers::ChatResponse;
    use crate::llm::{Credential, KeyPool, Usage};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;

    #[test]
    fn test_job_key_is_stable() {
        assert_eq!(job_key(JobKind::Wiki, "acme", "widgets"), "wiki:acme/widgets");
        assert_eq!(job_key(JobKind::Ask, "acme", "widgets"), "ask:acme/widgets");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Getting Started"), "getting-started");
        assert_eq!(slugify("API & Internals!"), "api-internals");
        assert_eq!(slugify("  CLI  "), "cli");
    }

    #[test]
    fn test_parse_outline_strips_list_markers() {
        let pages = parse_outline("- Overview\n2. Architecture\n\n* Getting Started\n");
        assert_eq!(
            pages,
            vec![
                PageRef::new("overview", "Overview"),
                PageRef::new("architecture", "Architecture"),
                PageRef::new("getting-started", "Getting Started"),
            ]
        );
    }

    /// Provider that replies with a canned response per call, in order.
    struct ScriptedProvider {
        responses: Mutex<Vec<Result<String, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        async fn generate(
            &self,
            _credential: &Credential,
            request: ChatRequest,
        ) -> Result<ChatResponse, ProviderError> {
            let mut responses = self.responses.lock().expect("responses lock");
            if responses.is_empty() {
                return Err(ProviderError::RequestFailed(
                    "no scripted response left".to_string(),
                ));
            }
            responses.remove(0).map(|content| ChatResponse {
                model: request.model,
                content,
                usage: Usage::default(),
            })
        }
    }

    fn generator_with(responses: Vec<Result<String, ProviderError>>) -> WikiGenerator {
        let pool = Arc::new(KeyPool::new(
            "openai",
            vec![Credential::new("openai-1", "sk-test")],
        ));
        WikiGenerator::new(
            Arc::new(ScriptedProvider::new(responses)),
            Dispatcher::new(pool),
            "gpt-4o",
        )
    }

    #[tokio::test]
    async fn test_wiki_stream_event_sequence() {
        let generator = generator_with(vec![
            Ok("Overview\nArchitecture".to_string()),
            Ok("# Overview\nBody".to_string()),
            Ok("# Architecture\nBody".to_string()),
        ]);

        let events: Vec<_> = generator
            .wiki_stream("acme", "widgets")
            .collect::<Vec<_>>()
            .await;
        let events: Vec<JobEvent> = events
            .into_iter()
            .collect::<Result<_, _>>()
            .expect("no stream errors");

        assert_eq!(events.len(), 6);
        assert!(matches!(events[0], JobEvent::Status { .. }));
        assert_eq!(
            events[1],
            JobEvent::Outline {
                pages: vec![
                    PageRef::new("overview", "Overview"),
                    PageRef::new("architecture", "Architecture"),
                ]
            }
        );
        assert_eq!(events[3], JobEvent::chunk("# Overview\nBody"));
        assert_eq!(events[5], JobEvent::Done);
    }

    #[tokio::test]
    async fn test_wiki_stream_surfaces_provider_failure() {
        let generator = generator_with(vec![Ok("Overview".to_string()),
            Err(ProviderError::Api {
                code: 500,
                message: "upstream exploded".to_string(),
            })]);

        let items: Vec<_> = generator
            .wiki_stream("acme", "widgets")
            .collect::<Vec<_>>()
            .await;

        let err = items
            .into_iter()
            .find_map(Result::err)
            .expect("stream reports the failure");
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[tokio::test]
    async fn test_answer_stream_event_sequence() {
        let generator = generator_with(vec![Ok("It parses TOML.".to_string())]);

        let events: Vec<JobEvent> = generator
            .answer_stream("acme", "widgets", "What does this repo do?")
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .expect("no stream errors");

        assert_eq!(
            events,
            vec![
                JobEvent::status("answering question about acme/widgets"),
                JobEvent::chunk("It parses TOML."),
                JobEvent::Done,
            ]
        );
    }
}
