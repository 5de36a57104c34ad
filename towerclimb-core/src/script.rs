use std::collections::HashMap;

use crate::rom::{self, fixed, RomImage, ScriptArena, EVENT_BANK_BASE};
use crate::Result;

/// The slice of the event opcode set the generator emits. Operand layouts
/// follow the engine's documented encodings; anything not listed here is
/// reached only through the fixed entry points in [`crate::rom::fixed`].
pub(crate) mod op {
    /// End of script.
    pub const END: u8 = 0xFE;
    /// Long call, 3-byte bank-relative operand.
    pub const CALL: u8 = 0xB2;
    /// Show a dialogue by 2-byte id.
    pub const SHOW_TEXT: u8 = 0x4B;
    /// Two-way branch on the last dialogue choice, two 3-byte targets.
    pub const BRANCH_CHOICE: u8 = 0xB6;
    /// Deduct a 2-byte gil amount.
    pub const TAKE_GIL: u8 = 0x85;
    /// Add a character to the roster.
    pub const CREATE_CHAR: u8 = 0x3D;
    /// Remove a character object.
    pub const DELETE_CHAR: u8 = 0x3E;
    /// Assign a character to a party slot (0 = none).
    pub const ASSIGN_PARTY: u8 = 0x3F;
    /// Switch the active party.
    pub const SET_ACTIVE_PARTY: u8 = 0x46;
    /// Open the party-select menu; operands: party count, 2-byte lock mask.
    pub const PARTY_SELECT: u8 = 0x99;
    /// Warp; operands: 2-byte map word (entry tags in the high bits), x, y,
    /// mode byte.
    pub const LOAD_MAP: u8 = 0x6B;
    /// Open a shop menu by catalog id.
    pub const OPEN_SHOP: u8 = 0x9B;
    /// Place a numbered party on a map.
    pub const PLACE_PARTY: u8 = 0x79;
    /// Clear a progress bit in the 0x000-0x0FF page (odd opcodes step
    /// through the higher pages).
    pub const CLEAR_BIT: u8 = 0xD7;
}

/// `[CALL, rel24]` jump into a previously emitted or fixed script.
pub(crate) fn call(target: usize) -> Result<Vec<u8>> {
    let rel = rom::to_rel24(target, EVENT_BANK_BASE)?;
    Ok(vec![op::CALL, rel[0], rel[1], rel[2]])
}

/// Addresses of the shared script bodies every floor jumps into. Emitted
/// once, ahead of the floor loop.
pub(crate) struct SharedScripts {
    pub clear_party: usize,
    pub post_boss: usize,
    pub pay_save_tail: usize,
    pub pay_inn_tail: usize,
}

pub(crate) fn emit_shared_scripts(
    arena: &mut ScriptArena,
    image: &mut RomImage,
) -> Result<SharedScripts> {
    // Empty the active party and pull every character out of the roster.
    let mut script = vec![op::SET_ACTIVE_PARTY, 0x01];
    for i in 0..14u8 {
        script.extend_from_slice(&[op::DELETE_CHAR, i]);
        script.extend_from_slice(&[op::ASSIGN_PARTY, i, 0x00]);
    }
    script.push(op::END);
    let clear_party = arena.emit(image, &script)?;

    // After a gate boss: run the shared game-over check, drop the marker
    // NPC, lift the battle fade.
    let mut script = call(fixed::GAMEOVER_CHECK)?;
    script.extend_from_slice(&[
        op::DELETE_CHAR, 0x10,
        0x59, 0x08, // unfade
        op::END,
    ]);
    let post_boss = arena.emit(image, &script)?;

    // Paid save: verify the money actually left, flash, open the save
    // window.
    let script = [
        0xC0, 0xBE, 0x81, 0xFF, 0x69, 0x01, // skip ahead unless gil was taken
        0x55, 0x80, // flash
        0xD2, 0xB5, // allow saving
        0xD2, 0xBF,
        0x3A, // return control
        op::END,
    ];
    let pay_save_tail = arena.emit(image, &script)?;

    // Paid rest: same money check, then the shared refreshments routine.
    let mut script = vec![0xC0, 0xBE, 0x81, 0xFF, 0x69, 0x01];
    script.extend_from_slice(&call(fixed::REFRESHMENTS)?);
    script.push(op::END);
    let pay_inn_tail = arena.emit(image, &script)?;

    Ok(SharedScripts {
        clear_party,
        post_boss,
        pay_save_tail,
        pay_inn_tail,
    })
}

/// Offset of the confirm branch target inside a toll script: one
/// SHOW_TEXT for the price line, one for the prompt, then the branch
/// opcode with its two 3-byte operands.
const TOLL_YES_OFFSET: usize = 13;
/// The decline target sits past TAKE_GIL and the 4-byte tail call.
const TOLL_NO_OFFSET: usize = TOLL_YES_OFFSET + 7;

/// Build a "show price, ask, deduct, jump to tail" script. `at` is the
/// absolute address the script will be emitted to; the confirm/decline
/// branch targets are relative pointers into the script itself, so the
/// landing address has to be known up front.
pub(crate) fn build_toll_script(
    at: usize,
    price: u16,
    price_message: u16,
    ask_message: u16,
    tail: usize,
) -> Result<Vec<u8>> {
    let yes = rom::to_rel24(at + TOLL_YES_OFFSET, EVENT_BANK_BASE)?;
    let no = rom::to_rel24(at + TOLL_NO_OFFSET, EVENT_BANK_BASE)?;

    let mut script = Vec::with_capacity(TOLL_NO_OFFSET + 1);
    script.push(op::SHOW_TEXT);
    script.extend_from_slice(&price_message.to_le_bytes());
    script.push(op::SHOW_TEXT);
    script.extend_from_slice(&ask_message.to_le_bytes());
    script.push(op::BRANCH_CHOICE);
    script.extend_from_slice(&yes);
    script.extend_from_slice(&no);
    script.push(op::TAKE_GIL);
    script.extend_from_slice(&price.to_le_bytes());
    script.extend_from_slice(&call(tail)?);
    script.push(op::END);

    assert_eq!(script.len(), TOLL_NO_OFFSET + 1);
    assert_eq!(script[TOLL_YES_OFFSET], op::TAKE_GIL);
    assert_eq!(script[TOLL_NO_OFFSET], op::END);
    Ok(script)
}

/// Cache key for scripts that are identical whenever their price matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ScriptKey {
    PaySave(u16),
    PayInn(u16),
}

/// Reuses previously emitted scripts by semantic key so repeated floors
/// share one physical copy in the scratch window.
pub(crate) struct ScriptMemoizer {
    cache: HashMap<ScriptKey, usize>,
}

impl ScriptMemoizer {
    pub fn new() -> Self {
        ScriptMemoizer { cache: HashMap::new() }
    }

    /// Returns the cached address for `key`, or runs `builder` with the
    /// address the new script will land at, emits it, and caches the
    /// result. The builder runs at most once per distinct key.
    pub fn get_or_emit(
        &mut self,
        key: ScriptKey,
        arena: &mut ScriptArena,
        image: &mut RomImage,
        builder: impl FnOnce(usize) -> Result<Vec<u8>>,
    ) -> Result<usize> {
        if let Some(&addr) = self.cache.get(&key) {
            return Ok(addr);
        }
        let script = builder(arena.cursor())?;
        let addr = arena.emit(image, &script)?;
        self.cache.insert(key, addr);
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::{IMAGE_SIZE, SCRATCH_LIMIT, SCRATCH_START};

    fn blank_image() -> RomImage {
        RomImage::new(vec![0u8; IMAGE_SIZE]).unwrap()
    }

    #[test]
    fn call_encodes_bank_relative() {
        let cmd = call(EVENT_BANK_BASE + 0x012345).unwrap();
        assert_eq!(cmd, vec![op::CALL, 0x45, 0x23, 0x01]);
    }

    #[test]
    fn toll_script_branch_targets_line_up() {
        let at = SCRATCH_START + 0x40;
        let script = build_toll_script(at, 1500, 0x0A70, fixed::ASK_MESSAGE | 0x8000, SCRATCH_START)
            .unwrap();

        let rel = at - EVENT_BANK_BASE;
        let yes = script[6] as usize | (script[7] as usize) << 8 | (script[8] as usize) << 16;
        let no = script[9] as usize | (script[10] as usize) << 8 | (script[11] as usize) << 16;
        assert_eq!(yes, rel + TOLL_YES_OFFSET);
        assert_eq!(no, rel + TOLL_NO_OFFSET);

        // Confirming lands on the deduction, declining on the terminator.
        assert_eq!(script[yes - rel], op::TAKE_GIL);
        assert_eq!(&script[no - rel..], &[op::END]);
        assert_eq!(
            u16::from_le_bytes([script[yes - rel + 1], script[yes - rel + 2]]),
            1500
        );
    }

    #[test]
    fn memoizer_builds_once_per_key() {
        let mut image = blank_image();
        let mut arena = ScriptArena::new(SCRATCH_START, SCRATCH_LIMIT);
        let mut memo = ScriptMemoizer::new();
        let mut builds = 0u32;

        let first = memo
            .get_or_emit(ScriptKey::PaySave(100), &mut arena, &mut image, |_| {
                builds += 1;
                Ok(vec![op::END])
            })
            .unwrap();
        let again = memo
            .get_or_emit(ScriptKey::PaySave(100), &mut arena, &mut image, |_| {
                builds += 1;
                Ok(vec![op::END])
            })
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(builds, 1);

        // A different key, or the same price under a different kind, is a
        // fresh emit.
        let inn = memo
            .get_or_emit(ScriptKey::PayInn(100), &mut arena, &mut image, |_| {
                builds += 1;
                Ok(vec![op::END])
            })
            .unwrap();
        assert_ne!(first, inn);
        assert_eq!(builds, 2);
    }

    #[test]
    fn memoizer_hands_builder_the_landing_address() {
        let mut image = blank_image();
        let mut arena = ScriptArena::new(SCRATCH_START, SCRATCH_LIMIT);
        arena.emit(&mut image, &[0; 17]).unwrap();
        let mut memo = ScriptMemoizer::new();

        let addr = memo
            .get_or_emit(ScriptKey::PaySave(10), &mut arena, &mut image, |at| {
                assert_eq!(at, SCRATCH_START + 17);
                Ok(vec![op::END])
            })
            .unwrap();
        assert_eq!(addr, SCRATCH_START + 17);
    }

    #[test]
    fn shared_scripts_emit_in_order() {
        let mut image = blank_image();
        let mut arena = ScriptArena::new(SCRATCH_START, SCRATCH_LIMIT);
        let shared = emit_shared_scripts(&mut arena, &mut image).unwrap();

        assert_eq!(shared.clear_party, SCRATCH_START);
        assert!(shared.post_boss > shared.clear_party);
        assert!(shared.pay_save_tail > shared.post_boss);
        assert!(shared.pay_inn_tail > shared.pay_save_tail);

        // The clear-party script empties all fourteen roster slots and
        // terminates.
        assert_eq!(image.read_u8(shared.clear_party), op::SET_ACTIVE_PARTY);
        assert_eq!(image.read_u8(shared.post_boss - 1), op::END);
    }
}
