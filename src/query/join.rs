//! Join conditions between games and the entities they reference.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::model::{Game, GameResult, Relation};
use crate::query::errors::PlanError;
use crate::types::RecordId;

/// Which of a game's references must satisfy the nested query.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
pub enum JoinCondition {
    /// Either side (the only condition for one-sided relations).
    #[default]
    Any,
    /// Both sides.
    Both,
    /// Entity on the white side.
    White,
    /// Entity on the black side.
    Black,
    /// Side that won over the board.
    Winner,
    /// Side that lost over the board.
    Loser,
}

/// Entity ids that must all match for a game to be accepted.
pub type IdGroup = SmallVec<[RecordId; 2]>;

/// Alternative groups; a game is accepted when any one group matches.
pub type IdGroups = SmallVec<[IdGroup; 2]>;

impl JoinCondition {
    /// Conditions other than `Any` need a relation with two sides.
    pub fn validate(self, relation: Relation) -> Result<(), PlanError> {
        if self == JoinCondition::Any || relation.is_two_sided() {
            Ok(())
        } else {
            Err(PlanError::ConditionNotSupported {
                condition: self,
                relation,
            })
        }
    }

    /// Name used in explain output.
    pub fn name(self) -> &'static str {
        match self {
            JoinCondition::Any => "any",
            JoinCondition::Both => "both",
            JoinCondition::White => "white",
            JoinCondition::Black => "black",
            JoinCondition::Winner => "winner",
            JoinCondition::Loser => "loser",
        }
    }
}

impl fmt::Display for JoinCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Groups of entity ids of `game` selected by `condition`.
///
/// Winner and loser only exist for decisive over-the-board results, so
/// draws, forfeits and unfinished games produce no group. A missing
/// reference produces no group for its side.
pub fn id_groups(game: &Game, relation: Relation, condition: JoinCondition) -> IdGroups {
    let (white, black) = relation.refs(game);
    if !relation.is_two_sided() {
        return match (condition, white) {
            (JoinCondition::Any, Some(id)) => smallvec![smallvec![id]],
            _ => IdGroups::new(),
        };
    }
    let single = |id: Option<RecordId>| -> IdGroups {
        match id {
            Some(id) => smallvec![smallvec![id]],
            None => IdGroups::new(),
        }
    };
    match condition {
        JoinCondition::Any => [white, black]
            .into_iter()
            .flatten()
            .map(|id| -> IdGroup { smallvec![id] })
            .collect(),
        JoinCondition::Both => match (white, black) {
            (Some(w), Some(b)) => smallvec![smallvec![w, b]],
            _ => IdGroups::new(),
        },
        JoinCondition::White => single(white),
        JoinCondition::Black => single(black),
        JoinCondition::Winner => match game.result {
            GameResult::WhiteWins => single(white),
            GameResult::BlackWins => single(black),
            _ => IdGroups::new(),
        },
        JoinCondition::Loser => match game.result {
            GameResult::WhiteWins => single(black),
            GameResult::BlackWins => single(white),
            _ => IdGroups::new(),
        },
    }
}

/// Weight factor contributed by the entities when `game` is accepted.
///
/// `weight_of` resolves an entity id to its weight, or `None` when the
/// entity is not in the nested result. The factor of a group is the product
/// of its entities' weights; the best accepted group wins.
pub fn accept<F>(game: &Game, relation: Relation, condition: JoinCondition, weight_of: F) -> Option<f64>
where
    F: FnMut(RecordId) -> Option<f64>,
{
    let mut weight_of = weight_of;
    let mut best: Option<f64> = None;
    for group in id_groups(game, relation, condition) {
        let mut product = 1.0;
        let mut matched = true;
        for id in group {
            match weight_of(id) {
                Some(weight) => product *= weight,
                None => {
                    matched = false;
                    break;
                }
            }
        }
        if matched {
            best = Some(best.map_or(product, |current: f64| current.max(product)));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(white: u32, black: u32, result: GameResult) -> Game {
        Game {
            id: RecordId(1),
            white_id: RecordId(white),
            black_id: RecordId(black),
            white_elo: 0,
            black_elo: 0,
            result,
            tournament_id: RecordId(3),
            annotator_id: RecordId(0),
            source_id: RecordId(0),
            white_team_id: Some(RecordId(20)),
            black_team_id: None,
            tag_id: None,
            year: 2000,
            round: 1,
            eco: String::new(),
            ply_count: 0,
        }
    }

    fn only_nine(id: RecordId) -> Option<f64> {
        (id == RecordId(9)).then_some(1.0)
    }

    #[test]
    fn conditions_select_sides() {
        let g = game(5, 9, GameResult::WhiteWins);
        let rel = Relation::Player;
        assert_eq!(accept(&g, rel, JoinCondition::Winner, only_nine), None);
        assert_eq!(accept(&g, rel, JoinCondition::Loser, only_nine), Some(1.0));
        assert_eq!(accept(&g, rel, JoinCondition::Any, only_nine), Some(1.0));
        assert_eq!(accept(&g, rel, JoinCondition::Both, only_nine), None);
        assert_eq!(accept(&g, rel, JoinCondition::Black, only_nine), Some(1.0));
        assert_eq!(accept(&g, rel, JoinCondition::White, only_nine), None);
    }

    #[test]
    fn draws_and_forfeits_have_no_winner() {
        for result in [
            GameResult::Draw,
            GameResult::WhiteWinsOnForfeit,
            GameResult::BlackWinsOnForfeit,
            GameResult::BothLost,
            GameResult::NoResult,
        ] {
            let g = game(5, 9, result);
            assert!(id_groups(&g, Relation::Player, JoinCondition::Winner).is_empty());
            assert!(id_groups(&g, Relation::Player, JoinCondition::Loser).is_empty());
        }
    }

    #[test]
    fn missing_team_has_no_group() {
        let g = game(5, 9, GameResult::Draw);
        let any = id_groups(&g, Relation::Team, JoinCondition::Any);
        assert_eq!(any.len(), 1);
        assert_eq!(any[0].as_slice(), &[RecordId(20)]);
        assert!(id_groups(&g, Relation::Team, JoinCondition::Both).is_empty());
        assert!(id_groups(&g, Relation::Team, JoinCondition::Black).is_empty());
    }

    #[test]
    fn best_group_weight_wins() {
        let g = game(5, 9, GameResult::Draw);
        let weights = |id: RecordId| match id.0 {
            5 => Some(2.0),
            9 => Some(3.0),
            _ => None,
        };
        assert_eq!(accept(&g, Relation::Player, JoinCondition::Any, weights), Some(3.0));
        assert_eq!(accept(&g, Relation::Player, JoinCondition::Both, weights), Some(6.0));
    }

    #[test]
    fn one_sided_relations_only_support_any() {
        assert!(JoinCondition::Any.validate(Relation::Tournament).is_ok());
        assert!(JoinCondition::White.validate(Relation::Tournament).is_err());
        assert!(JoinCondition::Winner.validate(Relation::Team).is_ok());
        let g = game(5, 9, GameResult::Draw);
        let groups = id_groups(&g, Relation::Tournament, JoinCondition::Any);
        assert_eq!(groups[0].as_slice(), &[RecordId(3)]);
    }
}
