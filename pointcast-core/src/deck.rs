use crate::DeckType;

/// A single card in a deck
#[derive(Debug, Clone, PartialEq)]
pub struct CardValue {
    /// The value stored in a vote
    pub value: &'static str,
    /// What the card shows on its face
    pub label: &'static str,
    /// Special cards don't contribute to numeric statistics
    pub special: bool,
}

/// An enumerated set of permissible vote values
#[derive(Debug, Clone)]
pub struct Deck {
    pub name: &'static str,
    pub kind: DeckType,
    pub cards: Vec<CardValue>,
}

const fn card(value: &'static str, label: &'static str) -> CardValue {
    CardValue {
        value,
        label,
        special: false,
    }
}

const fn special(value: &'static str, label: &'static str) -> CardValue {
    CardValue {
        value,
        label,
        special: true,
    }
}

const SCRUM_CARDS: &[CardValue] = &[
    card("0", "0"),
    card("0.5", "1/2"),
    card("1", "1"),
    card("2", "2"),
    card("3", "3"),
    card("5", "5"),
    card("8", "8"),
    card("13", "13"),
    card("20", "20"),
    card("40", "40"),
    card("100", "100"),
    special("?", "?"),
    special("coffee", "☕"),
];

const FIBONACCI_CARDS: &[CardValue] = &[
    card("0", "0"),
    card("1", "1"),
    card("2", "2"),
    card("3", "3"),
    card("5", "5"),
    card("8", "8"),
    card("13", "13"),
    card("21", "21"),
    card("34", "34"),
    card("55", "55"),
    card("89", "89"),
    special("?", "?"),
    special("coffee", "☕"),
];

const SEQUENTIAL_CARDS: &[CardValue] = &[
    card("0", "0"),
    card("1", "1"),
    card("2", "2"),
    card("3", "3"),
    card("4", "4"),
    card("5", "5"),
    card("6", "6"),
    card("7", "7"),
    card("8", "8"),
    card("9", "9"),
    card("10", "10"),
    special("?", "?"),
    special("coffee", "☕"),
];

const TSHIRT_CARDS: &[CardValue] = &[
    card("XS", "XS"),
    card("S", "S"),
    card("M", "M"),
    card("L", "L"),
    card("XL", "XL"),
    card("XXL", "XXL"),
    special("?", "?"),
    special("coffee", "☕"),
];

/// Returns the deck for the given type
pub fn deck(kind: DeckType) -> Deck {
    let (name, cards) = match kind {
        DeckType::Scrum => ("Scrum", SCRUM_CARDS),
        DeckType::Fibonacci => ("Fibonacci", FIBONACCI_CARDS),
        DeckType::Sequential => ("Sequential", SEQUENTIAL_CARDS),
        DeckType::Tshirt => ("T-Shirt Sizes", TSHIRT_CARDS),
    };

    Deck {
        name,
        kind,
        cards: cards.to_vec(),
    }
}

/// All decks, in presentation order
pub fn all_decks() -> Vec<Deck> {
    [
        DeckType::Scrum,
        DeckType::Fibonacci,
        DeckType::Sequential,
        DeckType::Tshirt,
    ]
    .into_iter()
    .map(deck)
    .collect()
}

/// Parses a card value into a number, if it represents a finite real number
pub fn parse_card_value(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decks_end_with_special_cards() {
        for deck in all_decks() {
            let specials: Vec<_> = deck.cards.iter().filter(|c| c.special).collect();

            assert_eq!(specials.len(), 2, "{} deck", deck.name);
            assert_eq!(specials[0].value, "?");
            assert_eq!(specials[1].value, "coffee");
        }
    }

    #[test]
    fn parses_numeric_cards_only() {
        assert_eq!(parse_card_value("13"), Some(13.));
        assert_eq!(parse_card_value("0.5"), Some(0.5));
        assert_eq!(parse_card_value("?"), None);
        assert_eq!(parse_card_value("coffee"), None);
        assert_eq!(parse_card_value("XL"), None);
        assert_eq!(parse_card_value("inf"), None);
        assert_eq!(parse_card_value("NaN"), None);
    }
}
