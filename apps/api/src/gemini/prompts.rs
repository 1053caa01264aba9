// Resume-copy prompt templates. The user's text is fenced in triple quotes.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Casual,
    Professional,
    Confident,
    Friendly,
}

impl Tone {
    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Casual => "casual",
            Tone::Professional => "professional",
            Tone::Confident => "confident",
            Tone::Friendly => "friendly",
        }
    }
}

pub fn improve_writing_prompt(text: &str) -> String {
    format!(
        "You are an AI writing assistant specialized in writing copy for resumes.\n\
         Do not return anything else except the text you improved in the format you received it. \
         It should not begin with a newline. It should not have any prefix or suffix text.\n\
         Improve the writing of the following paragraph and returns in the language of the text:\n\
         \n\
         Text: \"\"\"{text}\"\"\"\n\
         \n\
         Revised Text: "
    )
}

pub fn fix_grammar_prompt(text: &str) -> String {
    format!(
        "You are an AI writing assistant specialized in fixing grammar.\n\
         Do not return anything else except the text you fixed in the format you received it. \
         It should not begin with a newline. It should not have any prefix or suffix text.\n\
         Fix the grammar of the following text and return in the same language:\n\
         \n\
         Text: \"\"\"{text}\"\"\"\n\
         \n\
         Fixed Text: "
    )
}

pub fn change_tone_prompt(text: &str, tone: Tone) -> String {
    format!(
        "You are an AI writing assistant specialized in changing the tone of text.\n\
         Do not return anything else except the modified text in the format you received it. \
         It should not begin with a newline. It should not have any prefix or suffix text.\n\
         Change the tone of the following text to be more {} and return in the same language:\n\
         \n\
         Text: \"\"\"{text}\"\"\"\n\
         \n\
         Modified Text: ",
        tone.as_str()
    )
}
