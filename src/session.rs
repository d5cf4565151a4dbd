//! Conversation state and the per-turn streaming loop.
//!
//! One user turn drives: request a completion, segment the streamed deltas,
//! render plain/thinking regions live, and on each closed function-call
//! block run extract -> dispatch and collect the rendered result blocks.
//! Non-empty results are appended as a user-role message and trigger an
//! automatic follow-up request with no new user-authored content, bounded
//! by `max_tool_turns`.

use std::io::Write as _;

use futures_util::StreamExt;

use crate::api::{delta_text, ChatClient, ChatMessage};
use crate::error::ClientError;
use crate::fc::{extract_function_calls, prompt};
use crate::segment::{SegmentEvent, StreamSegmenter};
use crate::stream::is_done_event;
use crate::tools::Dispatcher;

/// Downstream sinks for the segmenter's plain and thinking regions.
///
/// Function-call regions never reach the sink; they flow to the extractor.
pub trait TurnSink {
    fn plain(&mut self, text: &str);
    fn thinking(&mut self, text: &str);
    fn thinking_end(&mut self);
}

/// Renders the streamed turn on the terminal: prose as-is, thinking dimmed.
#[derive(Default)]
pub struct ConsoleSink {
    in_thinking: bool,
}

impl TurnSink for ConsoleSink {
    fn plain(&mut self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn thinking(&mut self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        if !self.in_thinking {
            self.in_thinking = true;
            let _ = stdout.write_all(b"\x1b[2m");
        }
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn thinking_end(&mut self) {
        if self.in_thinking {
            self.in_thinking = false;
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(b"\x1b[0m\n");
            let _ = stdout.flush();
        }
    }
}

/// One conversation against one endpoint, with tool dispatch wired in.
pub struct Session {
    client: ChatClient,
    dispatcher: Dispatcher,
    history: Vec<ChatMessage>,
    max_tool_turns: usize,
}

impl Session {
    #[must_use]
    pub fn new(client: ChatClient, dispatcher: Dispatcher, max_tool_turns: usize) -> Self {
        Self {
            client,
            dispatcher,
            history: vec![ChatMessage::system(prompt::system_prompt())],
            max_tool_turns,
        }
    }

    /// Drop everything except the system prompt. Background processes are
    /// owned by the registry and survive this.
    pub fn clear_history(&mut self) {
        self.history.truncate(1);
    }

    #[must_use]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Run one user turn to completion, including any automatic tool-result
    /// follow-up turns.
    ///
    /// # Errors
    ///
    /// Returns transport/upstream errors from the completion request; tool
    /// and parse failures degrade to diagnostics and result text instead.
    pub async fn run_user_turn(
        &mut self,
        input: &str,
        sink: &mut dyn TurnSink,
    ) -> Result<(), ClientError> {
        self.history.push(ChatMessage::user(input));

        let mut tool_turns = 0usize;
        loop {
            let results = self.run_assistant_turn(sink).await?;
            if results.is_empty() {
                break;
            }
            self.history.push(ChatMessage::user(results));
            tool_turns += 1;
            if tool_turns >= self.max_tool_turns {
                tracing::warn!(
                    limit = self.max_tool_turns,
                    "tool-turn limit reached, returning control to the user"
                );
                break;
            }
        }
        Ok(())
    }

    /// Stream one assistant turn. Returns the concatenated result blocks
    /// from every function-call block in the turn (empty when the turn made
    /// no recognized calls).
    async fn run_assistant_turn(&mut self, sink: &mut dyn TurnSink) -> Result<String, ClientError> {
        let mut segmenter = StreamSegmenter::new();
        let mut events: Vec<SegmentEvent> = Vec::new();
        let mut raw_turn = String::new();
        let mut results = String::new();

        {
            let stream = self.client.stream_chat(&self.history).await?;
            futures_util::pin_mut!(stream);

            while let Some(sse) = stream.next().await {
                if is_done_event(&sse) {
                    break;
                }
                let Some(text) = delta_text(&sse) else {
                    continue;
                };
                raw_turn.push_str(&text);
                segmenter.feed_into(&text, &mut events);
                self.drain_events(&mut events, sink, &mut results).await;
            }
        }

        segmenter.finish_into(&mut events);
        self.drain_events(&mut events, sink, &mut results).await;

        // The turn is recorded as authored; stripping thinking or call
        // markup from history is not this layer's concern.
        self.history.push(ChatMessage::assistant(raw_turn));
        Ok(results)
    }

    async fn drain_events(
        &self,
        events: &mut Vec<SegmentEvent>,
        sink: &mut dyn TurnSink,
        results: &mut String,
    ) {
        for event in events.drain(..) {
            match event {
                SegmentEvent::Plain(text) => sink.plain(&text),
                SegmentEvent::Thinking(text) => sink.thinking(&text),
                SegmentEvent::ThinkingEnd => sink.thinking_end(),
                SegmentEvent::FunctionCallBlock(block) => match extract_function_calls(&block) {
                    Ok(calls) => {
                        results.push_str(&self.dispatcher.dispatch_block(&calls).await);
                    }
                    Err(err) => {
                        tracing::warn!("skipping malformed function-call block: {err}");
                    }
                },
            }
        }
    }
}
