/// Instructions placed ahead of every extraction request.
pub const SYSTEM_MESSAGE: &str = "You are an intelligent text extraction and conversion assistant. \
Your task is to extract structured information from the given text and convert it into a pure JSON format. \
The JSON should contain only the structured data extracted from the text, with no additional commentary, \
explanations, or extraneous information. You may encounter cases where you can't find the data for the \
fields you have to extract, or the data will be in a foreign language. Process the following text and \
provide the output in pure JSON format with no words before or after the JSON:";

/// Lead-in for the page text.
pub const USER_MESSAGE: &str = "Extract the following information from the provided text:\nPage content:\n\n";

/// The `PromptBuilder` struct is responsible for constructing extraction prompts from page text.
pub struct PromptBuilder {
    /// The instruction block placed before the page text.
    instructions: String,
    /// The normalized page text.
    content: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(format!("{}\n{}", SYSTEM_MESSAGE, USER_MESSAGE))
    }
}

impl PromptBuilder {
    /// Creates a new `PromptBuilder` with the given instructions.
    ///
    /// # Arguments
    ///
    /// * `instructions` - The fixed text placed before the page content.
    ///
    /// # Returns
    ///
    /// A new instance of `PromptBuilder`.
    pub fn new(instructions: String) -> Self {
        Self {
            instructions,
            content: String::new(),
        }
    }

    /// Sets the page text.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// The fixed part of the prompt, used to reserve its share of the token budget.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Builds the prompt string.
    pub fn build(&self) -> String {
        format!("{}{}", self.instructions, self.content)
    }
}
