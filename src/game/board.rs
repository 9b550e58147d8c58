//! Ludo Board Geometry
//!
//! Positions are stored relative to the owning seat so the rules never
//! special-case a color. The shared-track cell is derived on demand:
//!
//! ```text
//! -1        base (unspawned)
//!  0..=51   shared track, relative to the seat's start cell (door at 51)
//! 52..=57   private home lane
//! 58        finished
//! ```

use crate::core::ids::SeatIndex;
use crate::sync::record::SeatColor;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Number of seats at a Ludo table.
pub const SEAT_COUNT: u8 = 4;

/// Tokens owned by each seat.
pub const TOKENS_PER_SEAT: u8 = 4;

/// Total tokens on the board.
pub const TOKEN_COUNT: usize = (SEAT_COUNT * TOKENS_PER_SEAT) as usize;

/// Cells on the shared track.
pub const TRACK_LEN: i8 = 52;

/// Relative position of a token in base.
pub const BASE: i8 = -1;

/// Last shared-track cell before the home lane.
pub const DOOR: i8 = 51;

/// First home-lane cell.
pub const HOME_LANE_START: i8 = 52;

/// Relative position of a finished token.
pub const FINISHED: i8 = 58;

/// Distance between consecutive seats' start cells.
pub const SEAT_STRIDE: u8 = 13;

/// Die face that spawns a token and grants an extra roll.
pub const SPAWN_ROLL: u8 = 6;

/// Global cells immune to capture and blockade: the four start cells plus
/// the four star cells eight steps past each.
pub const SAFE_CELLS: [u8; 8] = [0, 8, 13, 21, 26, 34, 39, 47];

const SEAT_COLORS: [SeatColor; SEAT_COUNT as usize] = [
    SeatColor::Blue,
    SeatColor::Red,
    SeatColor::Green,
    SeatColor::Yellow,
];

// =============================================================================
// GEOMETRY
// =============================================================================

/// Fixed color for a seat.
pub fn seat_color(seat: SeatIndex) -> SeatColor {
    SEAT_COLORS[(seat % SEAT_COUNT) as usize]
}

/// Global cell where a seat's tokens enter the track.
#[inline]
pub fn start_offset(seat: SeatIndex) -> u8 {
    (seat % SEAT_COUNT) * SEAT_STRIDE
}

/// Seat that takes the turn after `seat`.
#[inline]
pub fn next_seat(seat: SeatIndex) -> SeatIndex {
    (seat + 1) % SEAT_COUNT
}

/// Is the relative position on the shared track?
#[inline]
pub fn on_track(position: i8) -> bool {
    (0..=DOOR).contains(&position)
}

/// Is the relative position inside the private home lane?
#[inline]
pub fn in_home_lane(position: i8) -> bool {
    (HOME_LANE_START..FINISHED).contains(&position)
}

/// Global cell for a token, or `None` when it is off the shared track.
#[inline]
pub fn global_cell(seat: SeatIndex, position: i8) -> Option<u8> {
    if !on_track(position) {
        return None;
    }
    Some(((position as u16 + start_offset(seat) as u16) % TRACK_LEN as u16) as u8)
}

/// Is the global cell safe?
#[inline]
pub fn is_safe(cell: u8) -> bool {
    SAFE_CELLS.contains(&cell)
}

/// Relative position after moving `dice` pips, or `None` if the move is
/// impossible (wrong roll to spawn, overshooting the finish, already finished).
///
/// A move that carries past the door stops on the first home-lane cell.
pub fn compute_next_position(position: i8, dice: u8) -> Option<i8> {
    if !(1..=6).contains(&dice) {
        return None;
    }
    let dice = dice as i8;

    match position {
        BASE => (dice as u8 == SPAWN_ROLL).then_some(0),
        p if on_track(p) => {
            let target = p + dice;
            Some(if target > DOOR { HOME_LANE_START } else { target })
        }
        p if in_home_lane(p) => {
            let target = p + dice;
            (target <= FINISHED).then_some(target)
        }
        _ => None,
    }
}

/// Global cells a token touches when moving from `from` to `to`, in order,
/// including the landing cell. Home-lane cells are private and never listed.
pub fn path_cells(seat: SeatIndex, from: i8, to: i8) -> Vec<u8> {
    if from == BASE {
        return global_cell(seat, to).into_iter().collect();
    }
    let last = to.min(DOOR);
    ((from + 1)..=last)
        .filter_map(|p| global_cell(seat, p))
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
