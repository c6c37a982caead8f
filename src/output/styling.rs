use std::fmt::Display;

use console::{style, StyledObject};

/// What a piece of terminal output conveys. Colours are dropped
/// automatically when stderr is not a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Good,
    Pending,
    Bad,
    Value,
    Muted,
    Heading,
    Brand,
}

pub fn paint(tone: Tone, text: impl Display) -> StyledObject<String> {
    let styled = style(text.to_string());
    match tone {
        Tone::Good => styled.bright().green(),
        Tone::Pending => styled.bright().yellow(),
        Tone::Bad => styled.bright().red(),
        Tone::Value => styled.cyan(),
        Tone::Muted => styled.dim(),
        Tone::Heading => styled.bright().underlined(),
        Tone::Brand => styled.magenta().bold(),
    }
}
