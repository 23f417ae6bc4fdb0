use crate::models::{GameType, StageInfo};

pub const STAGE_COUNT: u32 = 10;

const STAGES: [StageInfo; STAGE_COUNT as usize] = [
    stage(1, GameType::Matching, 3),
    stage(2, GameType::Mcq, 2),
    stage(3, GameType::DragDrop, 4),
    stage(4, GameType::FillBlank, 2),
    stage(5, GameType::Matching, 3),
    stage(6, GameType::Mcq, 2),
    stage(7, GameType::DragDrop, 4),
    stage(8, GameType::FillBlank, 2),
    stage(9, GameType::Mcq, 2),
    stage(10, GameType::DragDrop, 6),
];

const fn stage(level_number: u32, game_type: GameType, required_score: u32) -> StageInfo {
    StageInfo {
        level_number,
        game_type,
        required_score,
    }
}

pub fn stages() -> &'static [StageInfo] {
    &STAGES
}

pub fn stage_info(level_number: u32) -> Option<StageInfo> {
    STAGES
        .iter()
        .find(|stage| stage.level_number == level_number)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_contiguous_from_one() {
        for (index, stage) in stages().iter().enumerate() {
            assert_eq!(stage.level_number as usize, index + 1);
            assert!(stage.required_score > 0);
        }
    }

    #[test]
    fn lookup() {
        let last = stage_info(10).unwrap();
        assert_eq!(last.game_type, GameType::DragDrop);
        assert_eq!(last.required_score, 6);
        assert_eq!(stage_info(4).unwrap().game_type, GameType::FillBlank);
        assert!(stage_info(0).is_none());
        assert!(stage_info(11).is_none());
    }
}
