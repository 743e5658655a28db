//! Turns one command line into a typed [`Command`]. Shape only: the
//! parser never looks at game state, every semantic question is the
//! validator's business. Matching is case-insensitive, captured names
//! keep their case.

use crate::errors::ParseError;
use crate::order::{
    ArtifactPlace, BuildProduct, FireTarget, Order, RelationChange, TransferTarget,
};
use protocol::{CharacterType, FleetId, WorldId};

/// Parser output: either a game order for the queue or a session
/// command the engine executes immediately.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Order(Order),
    Join {
        name: String,
        minutes: Option<u64>,
        character: Option<CharacterType>,
    },
    /// Toggle readiness for the next turn.
    Turn,
    Help(Option<HelpQuery>),
    /// Remove the queued order with this zero-based index.
    Cancel(usize),
    /// Look up one artifact.
    ViewArtifact { artifact: u16 },
}

/// What a HELP request points at.
#[derive(Clone, Debug, PartialEq)]
pub enum HelpQuery {
    Topic(String),
    Fleet(FleetId),
    World(WorldId),
}

/// Parses one line of input.
pub fn parse(input: &str) -> Result<Command, ParseError> {
    let line = input.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    // Word-shaped commands first.
    let mut words = line.split_whitespace();
    let first = words.next().unwrap();
    match first.to_ascii_uppercase().as_str() {
        "JOIN" => return parse_join(words),
        "TURN" => return expect_no_words(words, Command::Turn, line),
        "HELP" => return parse_help(words),
        "CANCEL" => {
            let index = words
                .next()
                .ok_or_else(|| ParseError::MissingNumber("CANCEL".into()))?;
            let index: usize = index
                .parse()
                .map_err(|_| ParseError::MissingNumber("CANCEL".into()))?;
            return expect_no_words(words, Command::Cancel(index), line);
        }
        _ => {}
    }

    // Relation declarations: single letter, '=', a name.
    if let Some((prefix, name)) = line.split_once('=') {
        let change = match prefix.trim().to_ascii_uppercase().as_str() {
            "A" => Some(RelationChange::Ally),
            "L" => Some(RelationChange::Loader),
            "X" => Some(RelationChange::Unloader),
            "J" => Some(RelationChange::Jihad),
            "N" => Some(RelationChange::Neutral),
            _ => None,
        };
        if let Some(change) = change {
            let name = name.trim();
            if !valid_player_name(name) {
                return Err(ParseError::BadPlayerName);
            }
            return Ok(Command::Order(Order::DeclareRelation {
                change,
                player: name.to_string(),
            }));
        }
    }

    // Everything else is compact-grammar shaped.
    let mut scanner = Scanner::new(line);
    let command = match scanner.next_upper() {
        Some('F') => parse_fleet_order(&mut scanner, line)?,
        Some('W') => parse_world_order(&mut scanner, line)?,
        Some('C') => parse_convert_migration(&mut scanner, line)?,
        Some('Z') => {
            let world = scanner.maybe_number()?.map(as_id).transpose()?;
            Command::Order(Order::NoAmbush { world })
        }
        Some('V') => {
            let artifact = as_id(scanner.number("V")?)?;
            // An optional location suffix is tolerated and ignored; the
            // lookup answers from the asking player's view anyway.
            scanner.skip_location_suffix();
            Command::ViewArtifact { artifact }
        }
        _ => return Err(ParseError::UnknownCommand(line.to_string())),
    };
    scanner.expect_end(line)?;
    Ok(command)
}

fn parse_join<'a>(mut words: impl Iterator<Item = &'a str>) -> Result<Command, ParseError> {
    let name = words.next().ok_or(ParseError::BadPlayerName)?;
    if !valid_player_name(name) {
        return Err(ParseError::BadPlayerName);
    }
    let mut minutes = None;
    let mut character = None;
    for word in words {
        if let Ok(value) = word.parse::<u64>() {
            if !(5..=1440).contains(&value) {
                return Err(ParseError::BadTurnPreference);
            }
            minutes = Some(value);
        } else {
            character = Some(
                CharacterType::from_user_input(word)
                    .ok_or_else(|| ParseError::UnknownCharacter(word.to_string()))?,
            );
        }
    }
    Ok(Command::Join {
        name: name.to_string(),
        minutes,
        character,
    })
}

fn parse_help<'a>(mut words: impl Iterator<Item = &'a str>) -> Result<Command, ParseError> {
    let Some(topic) = words.next() else {
        return Ok(Command::Help(None));
    };
    let mut scanner = Scanner::new(topic);
    let query = match scanner.next_upper() {
        Some('F') if scanner.peek_digit() => HelpQuery::Fleet(as_id(scanner.number("F")?)?),
        Some('W') if scanner.peek_digit() => HelpQuery::World(as_id(scanner.number("W")?)?),
        _ => HelpQuery::Topic(topic.to_ascii_lowercase()),
    };
    Ok(Command::Help(Some(query)))
}

fn expect_no_words<'a>(
    mut words: impl Iterator<Item = &'a str>,
    command: Command,
    line: &str,
) -> Result<Command, ParseError> {
    if words.next().is_some() {
        return Err(ParseError::TrailingInput(line.to_string()));
    }
    Ok(command)
}

fn parse_fleet_order(scanner: &mut Scanner, line: &str) -> Result<Command, ParseError> {
    let fleet = as_id(scanner.number("F")?)?;
    let order = match scanner.next_upper() {
        Some('W') => {
            let mut path = vec![as_id(scanner.number("W")?)?];
            while scanner.eat_upper('W') {
                path.push(as_id(scanner.number("W")?)?);
            }
            Order::Move { fleet, path }
        }
        Some('T') => {
            if scanner.eat_upper('A') {
                let artifact = as_id(scanner.number("TA")?)?;
                let to = scanner.artifact_place(line)?;
                Order::TransferArtifact {
                    from: ArtifactPlace::Fleet(fleet),
                    from_world: None,
                    artifact,
                    to,
                }
            } else {
                let amount = scanner.number("T")?;
                let target = match scanner.next_upper() {
                    Some('I') => TransferTarget::IShips,
                    Some('P') => TransferTarget::PShips,
                    Some('F') => TransferTarget::Fleet(as_id(scanner.number("F")?)?),
                    _ => return Err(ParseError::MissingTarget(line.to_string())),
                };
                Order::TransferShips { fleet, amount, target }
            }
        }
        Some('L') => Order::LoadCargo { fleet, amount: scanner.maybe_number()? },
        Some('U') => {
            if scanner.eat_upper('C') {
                Order::UnloadConsumerGoods { fleet, amount: scanner.maybe_number()? }
            } else {
                Order::UnloadCargo { fleet, amount: scanner.maybe_number()? }
            }
        }
        Some('J') => Order::JettisonCargo { fleet, amount: scanner.maybe_number()? },
        Some('A') => match scanner.next_upper() {
            None => Order::Ambush { fleet },
            Some('F') => Order::FireAtFleet { fleet, target: as_id(scanner.number("F")?)? },
            Some(letter) => Order::FireAtTarget {
                fleet,
                target: fire_target(letter, line)?,
            },
        },
        Some('C') => match scanner.next_upper() {
            Some('F') => Order::ConditionalFire {
                fleet,
                target: FireTarget::Fleet(as_id(scanner.number("F")?)?),
            },
            Some(letter) => Order::ConditionalFire {
                fleet,
                target: fire_target(letter, line)?,
            },
            None => return Err(ParseError::MissingTarget(line.to_string())),
        },
        Some('G') => {
            let name = scanner.gift_name(line)?;
            Order::GiftFleet { fleet, to: name }
        }
        Some('B') => Order::BuildPbb { fleet },
        Some('D') => Order::DropPbb { fleet },
        Some('R') => Order::RobotAttack { fleet, amount: scanner.number("R")? },
        Some('P') => Order::Plunder { fleet, amount: scanner.number("P")? },
        Some('Q') => Order::Peace { fleet },
        Some('X') => Order::NotPeace { fleet },
        _ => return Err(ParseError::UnknownCommand(line.to_string())),
    };
    Ok(Command::Order(order))
}

fn parse_world_order(scanner: &mut Scanner, line: &str) -> Result<Command, ParseError> {
    let world = as_id(scanner.number("W")?)?;
    let order = match scanner.next_upper() {
        // Two build-syntax generations coexist: `W3B10I` and `W3I10I`
        // mean the same build and normalize identically.
        Some('B') | Some('I') => {
            let amount = scanner.number("B")?;
            let product = scanner.build_product(line)?;
            Order::Build { world, amount, product }
        }
        Some('M') => {
            let amount = scanner.number("M")?;
            if !scanner.eat_upper('W') {
                return Err(ParseError::MissingTarget(line.to_string()));
            }
            let target = as_id(scanner.number("W")?)?;
            Order::Migrate { world, amount, target }
        }
        Some('G') => {
            let name = scanner.gift_name(line)?;
            Order::GiftWorld { world, to: name }
        }
        Some('S') => Order::ScrapShips { world, amount: scanner.number("S")? },
        Some('X') => Order::Probe { world },
        Some('T') => {
            if !scanner.eat_upper('A') {
                return Err(ParseError::UnknownCommand(line.to_string()));
            }
            let artifact = as_id(scanner.number("TA")?)?;
            let to = scanner.artifact_place(line)?;
            Order::TransferArtifact {
                from: ArtifactPlace::LocalWorld,
                from_world: Some(world),
                artifact,
                to,
            }
        }
        _ => return Err(ParseError::UnknownCommand(line.to_string())),
    };
    Ok(Command::Order(order))
}

fn parse_convert_migration(scanner: &mut Scanner, line: &str) -> Result<Command, ParseError> {
    let world = as_id(scanner.number("C")?)?;
    if !scanner.eat_upper('M') {
        return Err(ParseError::UnknownCommand(line.to_string()));
    }
    let amount = scanner.number("M")?;
    if !scanner.eat_upper('W') {
        return Err(ParseError::MissingTarget(line.to_string()));
    }
    let target = as_id(scanner.number("W")?)?;
    Ok(Command::Order(Order::MigrateConverts { world, amount, target }))
}

fn fire_target(letter: char, line: &str) -> Result<FireTarget, ParseError> {
    match letter {
        'I' => Ok(FireTarget::Industry),
        'P' => Ok(FireTarget::Population),
        'H' => Ok(FireTarget::Homeworld),
        'C' => Ok(FireTarget::Converts),
        _ => Err(ParseError::MissingTarget(line.to_string())),
    }
}

fn as_id(value: u32) -> Result<u16, ParseError> {
    u16::try_from(value).map_err(|_| ParseError::NumberOutOfRange(value.to_string()))
}

fn valid_player_name(name: &str) -> bool {
    (3..=20).contains(&name.chars().count())
        && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// A tiny cursor over the compact grammar. Letters match
/// case-insensitively, numbers greedily.
struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Scanner<'a> {
        Scanner { rest: input }
    }

    /// Consumes the next character, uppercased.
    fn next_upper(&mut self) -> Option<char> {
        let mut chars = self.rest.chars();
        let c = chars.next()?;
        self.rest = chars.as_str();
        Some(c.to_ascii_uppercase())
    }

    /// Consumes `expected` if it is next (case-insensitive).
    fn eat_upper(&mut self, expected: char) -> bool {
        let mut chars = self.rest.chars();
        if chars.next().map(|c| c.to_ascii_uppercase()) == Some(expected) {
            self.rest = chars.as_str();
            true
        } else {
            false
        }
    }

    fn peek_digit(&self) -> bool {
        self.rest.chars().next().is_some_and(|c| c.is_ascii_digit())
    }

    /// A mandatory number. `context` names the introducing token for
    /// the error text.
    fn number(&mut self, context: &str) -> Result<u32, ParseError> {
        self.maybe_number()?
            .ok_or_else(|| ParseError::MissingNumber(context.to_string()))
    }

    /// An optional number: present when the next character is a digit.
    fn maybe_number(&mut self) -> Result<Option<u32>, ParseError> {
        let digits: usize = self.rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Ok(None);
        }
        let (number, rest) = self.rest.split_at(digits);
        self.rest = rest;
        number
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ParseError::NumberOutOfRange(number.to_string()))
    }

    /// `F<n>` or `W` as an artifact transfer destination.
    fn artifact_place(&mut self, line: &str) -> Result<ArtifactPlace, ParseError> {
        match self.next_upper() {
            Some('F') => Ok(ArtifactPlace::Fleet(as_id(self.number("F")?)?)),
            Some('W') => Ok(ArtifactPlace::LocalWorld),
            _ => Err(ParseError::MissingTarget(line.to_string())),
        }
    }

    /// The build product suffix. Longest keywords first, since `IND`
    /// shares its first letter with the iship marker.
    fn build_product(&mut self, line: &str) -> Result<BuildProduct, ParseError> {
        for (keyword, product) in [
            ("LIMIT", BuildProduct::Limit),
            ("IND", BuildProduct::Industry),
            ("ROBOT", BuildProduct::Robots),
        ] {
            if self.rest.len() >= keyword.len()
                && self.rest[..keyword.len()].eq_ignore_ascii_case(keyword)
            {
                self.rest = &self.rest[keyword.len()..];
                return Ok(product);
            }
        }
        match self.next_upper() {
            Some('I') => Ok(BuildProduct::IShips),
            Some('P') => Ok(BuildProduct::PShips),
            Some('F') => Ok(BuildProduct::ToFleet(as_id(self.number("F")?)?)),
            _ => Err(ParseError::MissingTarget(line.to_string())),
        }
    }

    /// `=Name` for gift orders.
    fn gift_name(&mut self, line: &str) -> Result<String, ParseError> {
        if !self.eat_upper('=') {
            return Err(ParseError::MissingTarget(line.to_string()));
        }
        let name = self.rest.trim();
        self.rest = "";
        if !valid_player_name(name) {
            return Err(ParseError::BadPlayerName);
        }
        Ok(name.to_string())
    }

    /// Swallows an optional `F<n>` or `W` location suffix.
    fn skip_location_suffix(&mut self) {
        let saved = self.rest;
        match self.next_upper() {
            Some('F') => {
                if self.maybe_number().ok().flatten().is_none() {
                    self.rest = saved;
                }
            }
            Some('W') => {}
            _ => self.rest = saved,
        }
    }

    fn expect_end(&self, line: &str) -> Result<(), ParseError> {
        if self.rest.trim().is_empty() {
            Ok(())
        } else {
            Err(ParseError::TrailingInput(line.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(input: &str) -> Order {
        match parse(input).unwrap() {
            Command::Order(order) => order,
            other => panic!("expected an order for {input}, got {other:?}"),
        }
    }

    #[test]
    fn movement_paths_and_case_insensitivity() {
        assert_eq!(order("F1W2"), Order::Move { fleet: 1, path: vec![2] });
        assert_eq!(order("f12w3w45w6"), Order::Move { fleet: 12, path: vec![3, 45, 6] });
    }

    #[test]
    fn both_build_generations_normalize_identically() {
        let old_style = order("W3B10I");
        let new_style = order("W3I10I");
        assert_eq!(old_style, new_style);
        assert_eq!(old_style.normalized(), "W3B10I");
        assert_eq!(
            order("w3b2limit"),
            Order::Build { world: 3, amount: 2, product: BuildProduct::Limit }
        );
        assert_eq!(
            order("W3B4IND"),
            Order::Build { world: 3, amount: 4, product: BuildProduct::Industry }
        );
        assert_eq!(
            order("W3B4ROBOT"),
            Order::Build { world: 3, amount: 4, product: BuildProduct::Robots }
        );
        assert_eq!(
            order("W3B4F7"),
            Order::Build { world: 3, amount: 4, product: BuildProduct::ToFleet(7) }
        );
    }

    #[test]
    fn ambush_is_fire_without_a_target() {
        assert_eq!(order("F5A"), Order::Ambush { fleet: 5 });
        assert_eq!(order("F5AF6"), Order::FireAtFleet { fleet: 5, target: 6 });
        assert_eq!(
            order("F5AH"),
            Order::FireAtTarget { fleet: 5, target: FireTarget::Homeworld }
        );
        assert_eq!(
            order("F5CP"),
            Order::ConditionalFire { fleet: 5, target: FireTarget::Population }
        );
    }

    #[test]
    fn cargo_amounts_are_optional() {
        assert_eq!(order("F2L"), Order::LoadCargo { fleet: 2, amount: None });
        assert_eq!(order("F2L7"), Order::LoadCargo { fleet: 2, amount: Some(7) });
        assert_eq!(order("F2UC3"), Order::UnloadConsumerGoods { fleet: 2, amount: Some(3) });
        assert_eq!(order("F2U"), Order::UnloadCargo { fleet: 2, amount: None });
    }

    #[test]
    fn relations_and_gifts_keep_name_case() {
        assert_eq!(
            order("j=MightyBob"),
            Order::DeclareRelation { change: RelationChange::Jihad, player: "MightyBob".into() }
        );
        assert_eq!(order("F3G=Eve_2"), Order::GiftFleet { fleet: 3, to: "Eve_2".into() });
    }

    #[test]
    fn session_commands() {
        assert_eq!(
            parse("JOIN Alice 30 pirate").unwrap(),
            Command::Join {
                name: "Alice".into(),
                minutes: Some(30),
                character: Some(CharacterType::Pirate)
            }
        );
        assert_eq!(parse("turn").unwrap(), Command::Turn);
        assert_eq!(parse("CANCEL 2").unwrap(), Command::Cancel(2));
        assert_eq!(
            parse("help combat").unwrap(),
            Command::Help(Some(HelpQuery::Topic("combat".into())))
        );
        assert_eq!(parse("HELP F3").unwrap(), Command::Help(Some(HelpQuery::Fleet(3))));
        assert_eq!(parse("V7").unwrap(), Command::ViewArtifact { artifact: 7 });
    }

    #[test]
    fn rejects_shapes_that_do_not_fit() {
        assert!(matches!(parse(""), Err(ParseError::Empty)));
        assert!(matches!(parse("F1Z9"), Err(ParseError::UnknownCommand(_))));
        assert!(matches!(parse("FW2"), Err(ParseError::MissingNumber(_))));
        assert!(matches!(parse("F1W2 extra"), Err(ParseError::TrailingInput(_))));
        assert!(matches!(parse("JOIN xy"), Err(ParseError::BadPlayerName)));
        assert!(matches!(parse("JOIN Alice 3"), Err(ParseError::BadTurnPreference)));
        assert!(matches!(parse("F1C"), Err(ParseError::MissingTarget(_))));
    }

    #[test]
    fn parsing_the_normalized_text_reproduces_the_order() {
        let samples = [
            "F1W2W3", "W3B10I", "F2T5P", "F2T5F9", "F2L", "F2U4", "F2UC", "F2J1", "W1M10W2",
            "C1M10W2", "F5AF6", "F5AC", "F5A", "Z", "Z9", "F5CF6", "F5Q", "F5X", "F1G=Bob",
            "W1G=Bob", "F7B", "F7D", "F7R3", "F7P2", "F3TA7W", "W3TA7F4", "J=Bob", "W4S3",
            "W4X",
        ];
        for sample in samples {
            let parsed = order(sample);
            let reparsed = order(&parsed.normalized());
            assert_eq!(parsed, reparsed, "normalization drifted for {sample}");
        }
    }
}
