use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::party::{self, FloorParty};
use crate::records::{layout, LocationRecord, RecordStore};
use crate::rom::{
    self, fixed, RomImage, ScriptArena, EVENT_BANK_BASE, SCRATCH_LIMIT, SCRATCH_START,
};
use crate::script::{self, op, ScriptKey, ScriptMemoizer, SharedScripts};
use crate::shops::{self, ShopType};
use crate::{checkpoint_rng, Result, TowerError, TowerSettings};

/// Template map whose static data every outside floor clones.
const FLOOR_TEMPLATE: u16 = 0x167;
/// Ground-level map the first floor links back to.
const TOWER_BASE: u16 = 0x16A;
/// Fixed map above the last floor.
const TOWER_ROOF: u16 = 0x16C;
/// Template for the inner treasure rooms.
const TREASURE_TEMPLATE: u16 = 0x16D;
/// Where the closing cutscene plays out.
const FINAL_ROOM: u16 = 0x19B;

/// Entry-point tags OR'd into an entrance's destination word.
const DEST_TAG_INNER: u16 = 0x0800;
const DEST_TAG_UP: u16 = 0x1000;
const DEST_TAG_OUT: u16 = 0x2000;
const DEST_TAG_DOWN: u16 = 0x3000;

/// Map ids the generator must never repurpose: fixed story content,
/// menus, and the tower's own rooms.
fn is_banned_map(id: u16) -> bool {
    const BANNED: &[u16] = &[
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x07, 0x0B, 0x0C, 0x0D,
        0x11, 0x14, 0x15, 0x22, 0x2F, 0x37, 0x40, 0x4B, 0x50, 0x53, 0x5B,
        0x75, 0x7B, 0x7D, 0x7E, 0x7F,
        0x81, 0x82, 0x88, 0x89, 0x8C, 0x8F,
        0x90, 0x92, 0x99, 0x9C, 0x9D, 0xA9,
        0xB6, 0xB7, 0xB8, 0xBD, 0xBE,
        0xCD, 0xCF, 0xD0, 0xD1, 0xD9, 0xDD,
        0xD2, 0xD3, 0xD4, 0xD5, 0xD7,
        0xE1, 0xE7, 0xE9, 0xEA, 0xEB,
        0xFD, 0xFE, 0xFF,
        0x100, 0x102, 0x103, 0x104, 0x105, 0x106, 0x107, 0x10C, 0x12E,
        0x131, 0x132, 0x139, 0x13A, 0x13B, 0x13C, 0x13D, 0x13E,
        0x141, 0x142, 0x143, 0x144,
        0x150, 0x154, 0x155, 0x157, 0x158,
    ];
    if (0x160..0x200).contains(&id) {
        return id != TOWER_BASE && id != TOWER_ROOF;
    }
    BANNED.contains(&id)
}

/// Hands out fresh map ids from the non-banned pool in ascending order.
struct MapAllocator {
    next: u16,
}

impl MapAllocator {
    fn new() -> Self {
        let mut alloc = MapAllocator { next: 0 };
        alloc.skip_banned();
        alloc
    }

    fn skip_banned(&mut self) {
        while (self.next as usize) < layout::LOCATION_COUNT && is_banned_map(self.next) {
            self.next += 1;
        }
    }

    fn take(&mut self) -> Result<u16> {
        if self.next as usize >= layout::LOCATION_COUNT {
            return Err(TowerError::GenerationInfeasible(
                "free map pool exhausted; too many floors requested".to_string(),
            ));
        }
        let id = self.next;
        self.next += 1;
        self.skip_banned();
        Ok(id)
    }
}

/// The seven-way draw for a floor's interactive NPC. The plain item shop
/// appears twice, so it is twice as likely as any other single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpcKind {
    SavePoint,
    Inn,
    WeaponShop,
    ArmorShop,
    RelicShop,
    ItemShop,
    BonusArena,
}

impl NpcKind {
    pub fn label(self) -> &'static str {
        match self {
            NpcKind::SavePoint => "save point",
            NpcKind::Inn => "inn",
            NpcKind::WeaponShop => "weapon shop",
            NpcKind::ArmorShop => "armor shop",
            NpcKind::RelicShop => "relic shop",
            NpcKind::ItemShop => "item shop",
            NpcKind::BonusArena => "bonus arena",
        }
    }
}

fn npc_choice_pool(settings: &TowerSettings) -> Result<Vec<NpcKind>> {
    let mut pool = Vec::with_capacity(7);
    if settings.allow_save_points {
        pool.push(NpcKind::SavePoint);
    }
    if settings.allow_inns {
        pool.push(NpcKind::Inn);
    }
    if settings.allow_weapon_shops {
        pool.push(NpcKind::WeaponShop);
    }
    if settings.allow_armor_shops {
        pool.push(NpcKind::ArmorShop);
    }
    if settings.allow_relic_shops {
        pool.push(NpcKind::RelicShop);
    }
    if settings.allow_item_shops {
        pool.push(NpcKind::ItemShop);
        pool.push(NpcKind::ItemShop);
    }
    if pool.is_empty() {
        return Err(TowerError::Config(
            "every interactive NPC category is disabled".to_string(),
        ));
    }
    Ok(pool)
}

/// What got built on one floor, for the spoiler log and the tests.
#[derive(Debug, Clone)]
pub struct FloorReport {
    pub index: u32,
    pub outside_map: u16,
    pub inner_map: u16,
    pub party: [u8; party::ROSTER_SIZE],
    pub departed: Option<u8>,
    pub npc: NpcKind,
    pub price: u16,
}

#[derive(Debug, Clone)]
pub struct TowerReport {
    pub floors: Vec<FloorReport>,
    pub bonus_floor: u32,
    pub scratch_used: usize,
}

/// Shared mutable state threaded through the floor loop: the arena
/// cursor and the script cache are the only pieces that persist across
/// floors, and both only ever grow.
struct TowerBuilder<'a> {
    settings: &'a TowerSettings,
    store: &'a mut RecordStore,
    image: &'a mut RomImage,
    arena: ScriptArena,
    memoizer: ScriptMemoizer,
    shared: SharedScripts,
    npc_pool: Vec<NpcKind>,
    floor_template: LocationRecord,
    treasure_template: LocationRecord,
    next_membit: u32,
    bonus_floor: u32,
    trinket_floors: HashMap<u32, u8>,
}

impl<'a> TowerBuilder<'a> {
    /// Sever everything a repurposed map used to own. The records stay in
    /// the store until write-back drops them.
    fn purge_map(&mut self, id: u16) {
        let group = id as i32;
        self.store.entrances.sever_group(group);
        self.store.long_entrances.sever_group(group);
        self.store.events.sever_group(group);
        self.store.npcs.sever_group(group);
    }

    fn emit(&mut self, script: &[u8]) -> Result<usize> {
        self.arena.emit(self.image, script)
    }

    /// Emit (or reuse) a toll script and dress the NPC as its vendor.
    fn make_pay_save(&mut self, npc_index: usize, price: u16, price_message: u16) -> Result<()> {
        let tail = self.shared.pay_save_tail;
        let addr = self.memoizer.get_or_emit(
            ScriptKey::PaySave(price),
            &mut self.arena,
            self.image,
            |at| {
                script::build_toll_script(
                    at,
                    price,
                    price_message,
                    fixed::ASK_MESSAGE | 0x8000,
                    tail,
                )
            },
        )?;
        let npc = &mut self.store.npcs.records[npc_index];
        npc.graphics = 0x6F;
        npc.set_palette(6);
        npc.facing = 0x43;
        npc.set_event_addr((addr - EVENT_BANK_BASE) as u32);
        Ok(())
    }

    fn make_pay_inn(&mut self, npc_index: usize, price: u16, price_message: u16) -> Result<()> {
        let tail = self.shared.pay_inn_tail;
        let addr = self.memoizer.get_or_emit(
            ScriptKey::PayInn(price),
            &mut self.arena,
            self.image,
            |at| script::build_toll_script(at, price, price_message, fixed::INN_ASK_MESSAGE, tail),
        )?;
        let npc = &mut self.store.npcs.records[npc_index];
        npc.graphics = 0x1E;
        npc.set_palette(3);
        npc.set_event_addr((addr - EVENT_BANK_BASE) as u32);
        Ok(())
    }

    fn make_shop(&mut self, npc_index: usize, kind: NpcKind, rng: &mut StdRng) -> Result<()> {
        let (graphics, palette, types): (u8, u32, &[ShopType]) = match kind {
            NpcKind::WeaponShop => (0x0E, 4, &[ShopType::Weapons]),
            NpcKind::ArmorShop => (0x0E, 3, &[ShopType::Armor]),
            NpcKind::RelicShop => (0x13, 0, &[ShopType::Relics]),
            _ => (0x36, 1, &[ShopType::Items, ShopType::Misc]),
        };

        let candidates: Vec<u8> = self
            .store
            .shops
            .iter()
            .filter(|s| {
                s.rank(&self.store.item_prices) > 0
                    && s.shop_type().map_or(false, |t| types.contains(&t))
            })
            .map(|s| s.id)
            .collect();
        let Some(&chosen) = candidates.choose(rng) else {
            return Err(TowerError::Config(format!(
                "no stocked {} in the catalog",
                kind.label()
            )));
        };

        let addr = self.emit(&[op::OPEN_SHOP, chosen, op::END])?;
        let npc = &mut self.store.npcs.records[npc_index];
        npc.graphics = graphics;
        npc.set_palette(palette);
        npc.set_event_addr((addr - EVENT_BANK_BASE) as u32);
        Ok(())
    }

    /// Build one floor: the outside map with its party gate and boss, and
    /// the inner room with the chest and this floor's vendor.
    fn assemble_floor(
        &mut self,
        n: u32,
        alloc: &mut MapAllocator,
        rotation: &[FloorParty],
        prev: Option<u16>,
    ) -> Result<FloorReport> {
        let mut rng = checkpoint_rng(self.settings.seed, "per-floor", n as u64);
        let assignment = &rotation[n as usize];
        let members = assignment.members;
        let departed = assignment.departed;

        // Outside section.
        let outside = alloc.take()?;
        self.purge_map(outside);
        self.store
            .location_mut(outside)
            .copy_data(&self.floor_template);

        // Party gate on the floor below: rebuild the roster, lock a few
        // picks, let the player choose, then warp up.
        let num_locked: usize = (0..3).map(|_| rng.gen_range(0..=1usize)).sum();
        let mut to_lock: Vec<u8> = members
            .choose_multiple(&mut rng, num_locked)
            .copied()
            .collect();
        to_lock.sort_unstable();
        let mut suggested: Vec<u8> = members
            .iter()
            .copied()
            .filter(|c| !to_lock.contains(c))
            .collect::<Vec<u8>>()
            .choose_multiple(&mut rng, 4 - num_locked)
            .copied()
            .collect();
        suggested.sort_unstable();

        let mut script = script::call(self.shared.clear_party)?;
        for &c in members.iter() {
            script.extend_from_slice(&[op::CREATE_CHAR, c]);
        }
        if let Some(leaver) = departed {
            debug_assert!(!members.contains(&leaver));
            script.extend_from_slice(&[op::CREATE_CHAR, leaver]);
        }

        let mut locked: u16 = 0;
        for &c in &to_lock {
            script.extend_from_slice(&[op::ASSIGN_PARTY, c, 0x01]);
            locked |= 1 << c;
        }
        for &c in &suggested {
            script.extend_from_slice(&[op::ASSIGN_PARTY, c, 0x01]);
        }
        debug_assert_eq!(to_lock.len() + suggested.len(), 4);
        for c in 0..party::CHARACTER_POOL {
            if !members.contains(&c) {
                locked |= 1 << c;
            }
        }

        script.extend_from_slice(&[op::PARTY_SELECT, 0x01]);
        script.extend_from_slice(&locked.to_le_bytes());
        script.push(op::LOAD_MAP);
        script.extend_from_slice(&(outside | DEST_TAG_UP).to_le_bytes());
        script.extend_from_slice(&[9, 27, 0x00, op::END]);
        let gate_addr = self.emit(&script)?;

        let gate = self.store.events.create_new();
        gate.x = 8;
        gate.y = 1;
        gate.group = prev.unwrap_or(TOWER_BASE) as i32;
        gate.event_addr = (gate_addr - EVENT_BANK_BASE) as u32;

        // The boss holding the way up; beating it clears this floor's
        // membit.
        if self.next_membit > 0xFF {
            return Err(TowerError::ResourceExhausted {
                region: "membit index",
                needed: self.next_membit as usize,
                limit: 0xFF,
            });
        }
        let membit = self.next_membit;
        self.next_membit += 1;

        let mut script = script::call(self.shared.post_boss)?;
        script.extend_from_slice(&[
            op::CLEAR_BIT | (((membit >> 8) as u8) * 2),
            (membit & 0xFF) as u8,
            op::END,
        ]);
        let boss_addr = self.emit(&script)?;

        let boss = self.store.npcs.create_new();
        boss.group = outside as i32;
        boss.graphics = 0x6F;
        boss.set_palette(5);
        boss.facing = 0x43;
        boss.x = 5;
        boss.y = 3;
        boss.set_event_addr((boss_addr - EVENT_BANK_BASE) as u32);
        boss.set_membit(membit);
        debug_assert_eq!(self.store.npcs.group_len(outside as i32), 1);

        let back = self.store.entrances.create_new();
        back.group = outside as i32;
        back.dest = prev.unwrap_or(TOWER_BASE) | DEST_TAG_DOWN;
        back.x = 7;
        back.y = 29;
        back.dest_x = 7;
        back.dest_y = 2;

        // Inner section.
        let inner = alloc.take()?;
        self.purge_map(inner);
        self.store
            .location_mut(inner)
            .copy_data(&self.treasure_template);
        self.store.location_mut(inner).set_encounters_enabled(false);

        let door = self.store.entrances.create_new();
        door.group = outside as i32;
        door.dest = inner | DEST_TAG_INNER;
        door.x = 10;
        door.y = 10;
        door.dest_x = 7;
        door.dest_y = 12;
        let door = self.store.entrances.create_new();
        door.group = inner as i32;
        door.dest = outside | DEST_TAG_OUT;
        door.x = 7;
        door.y = 13;
        door.dest_x = 10;
        door.dest_y = 11;

        let chest = self.store.chests.create_new();
        chest.group = inner as i32;
        chest.x = 7;
        chest.y = 6;
        chest.set_memid(n as u16 + 1)?;
        chest.set_treasure(true);
        chest.contents = 0;

        let (price, price_message) = shops::tier_for_floor(n, self.settings.floors);

        if let Some(&trinket) = self.trinket_floors.get(&n) {
            let script = [
                0xF4, 0x8D, // chime
                0x86, 0x36 + trinket, // grant the collectible
                op::DELETE_CHAR, 0x10,
                op::END,
            ];
            let addr = self.emit(&script)?;
            let keeper = self.store.npcs.create_new();
            keeper.group = inner as i32;
            keeper.graphics = 0x5B;
            keeper.facing = 0x54;
            keeper.set_palette(2);
            keeper.x = 6;
            keeper.y = 6;
            keeper.set_event_addr((addr - EVENT_BANK_BASE) as u32);
            debug_assert_eq!(self.store.npcs.group_len(inner as i32), 1);
        }

        let vendor = self.store.npcs.create_new();
        vendor.group = inner as i32;
        vendor.facing = 2;
        vendor.x = 4;
        vendor.y = 8;
        let vendor_index = self.store.npcs.records.len() - 1;

        let kind = if n == self.bonus_floor {
            NpcKind::BonusArena
        } else {
            *self
                .npc_pool
                .choose(&mut rng)
                .expect("choice pool validated non-empty")
        };
        match kind {
            NpcKind::SavePoint => self.make_pay_save(vendor_index, price, price_message)?,
            NpcKind::Inn => self.make_pay_inn(vendor_index, price, price_message)?,
            NpcKind::BonusArena => {
                let npc = &mut self.store.npcs.records[vendor_index];
                npc.graphics = 0x3B;
                npc.set_palette(2);
                npc.set_event_addr((fixed::BONUS_ARENA - EVENT_BANK_BASE) as u32);
            }
            _ => self.make_shop(vendor_index, kind, &mut rng)?,
        }

        let stripper = self.store.npcs.create_new();
        stripper.group = inner as i32;
        stripper.graphics = 0x17;
        stripper.set_palette(0);
        stripper.facing = 2;
        stripper.x = 10;
        stripper.y = 8;
        stripper.set_event_addr((fixed::UNEQUIPPER - EVENT_BANK_BASE) as u32);

        let name_id = (n + 1) as u8;
        let outside_loc = self.store.location_mut(outside);
        outside_loc.name_id = name_id;
        outside_loc.set_encounters_enabled(false);
        outside_loc.set_palette(16);
        self.store.location_mut(inner).name_id = name_id;

        Ok(FloorReport {
            index: n,
            outside_map: outside,
            inner_map: inner,
            party: members,
            departed,
            npc: kind,
            price,
        })
    }

    /// Wire the roof above the last floor and stage the closing scene.
    fn build_caps(&mut self, last_floor: u16, last_price: u16, last_message: u16) -> Result<()> {
        let mut rng = checkpoint_rng(self.settings.seed, "post-tower", 0);

        let up = self.store.entrances.create_new();
        up.group = last_floor as i32;
        up.x = 8;
        up.y = 1;
        up.dest = TOWER_ROOF | DEST_TAG_UP;
        up.dest_x = 8;
        up.dest_y = 13;

        let down = self.store.entrances.create_new();
        down.group = TOWER_ROOF as i32;
        down.x = 7;
        down.y = 14;
        down.dest = last_floor | DEST_TAG_DOWN;
        down.dest_x = 7;
        down.dest_y = 2;

        let saver = self.store.npcs.create_new();
        saver.group = TOWER_ROOF as i32;
        saver.x = 4;
        saver.y = 5;
        let saver_index = self.store.npcs.records.len() - 1;
        self.make_pay_save(saver_index, last_price, last_message)?;

        let stripper = self.store.npcs.create_new();
        stripper.group = TOWER_ROOF as i32;
        stripper.graphics = 0x17;
        stripper.set_palette(0);
        stripper.facing = 2;
        stripper.x = 11;
        stripper.y = 6;
        stripper.set_event_addr((fixed::UNEQUIPPER - EVENT_BANK_BASE) as u32);

        self.store.entrances.sever_group(FINAL_ROOM as i32);

        // The roof trigger: rebuild the full roster, pin a few members
        // into each of the three parties, then stage all three into the
        // final room.
        let mut script = script::call(self.shared.clear_party)?;
        script.extend_from_slice(&script::call(fixed::LOAD_ALL_PARTY)?);

        let mut locked: u16 = 0;
        let mut not_locked: Vec<u8> = (0..party::CHARACTER_POOL).collect();
        for group in 1..=3u8 {
            let num_lock = (rng.gen::<f64>() + rng.gen::<f64>() + rng.gen::<f64>()).round() as usize;
            for _ in 0..num_lock {
                let Some(&c) = not_locked.choose(&mut rng) else {
                    break;
                };
                locked |= 1 << c;
                script.extend_from_slice(&[op::ASSIGN_PARTY, c, group]);
                not_locked.retain(|&x| x != c);
            }
        }

        script.extend_from_slice(&[op::SET_ACTIVE_PARTY, 0x02]);
        script.extend_from_slice(&[op::PARTY_SELECT, 0x03]);
        script.extend_from_slice(&locked.to_le_bytes());
        script.push(op::LOAD_MAP);
        script.extend_from_slice(&FINAL_ROOM.to_le_bytes());
        script.extend_from_slice(&[109, 42, 0x00]);
        script.extend_from_slice(&[0xD2, 0xCE]); // allow party switching

        // Place and walk in party 3, then 1, then settle on 2.
        script.extend_from_slice(&[op::PLACE_PARTY, 0x03]);
        script.extend_from_slice(&FINAL_ROOM.to_le_bytes());
        script.extend_from_slice(&[
            op::SET_ACTIVE_PARTY, 0x03,
            0x45,
            0x31, 0x84, 0xD5, 115, 44, 0xFF,
            0x47,
            0x41, 0x31,
            0x45,
        ]);
        script.extend_from_slice(&[op::PLACE_PARTY, 0x01]);
        script.extend_from_slice(&FINAL_ROOM.to_le_bytes());
        script.extend_from_slice(&[
            op::SET_ACTIVE_PARTY, 0x01,
            0x45,
            0x31, 0x84, 0xD5, 103, 45, 0xFF,
            0x47,
            0x41, 0x31,
            0x45,
            op::SET_ACTIVE_PARTY, 0x02,
            0x45,
            0x31, 0x84, 0xD5, 109, 42, 0xFF,
            0x47,
            0x45,
            op::END,
        ]);
        let trigger_addr = self.emit(&script)?;

        let trigger = self.store.events.create_new();
        trigger.x = 7;
        trigger.y = 6;
        trigger.group = TOWER_ROOF as i32;
        trigger.event_addr = (trigger_addr - EVENT_BANK_BASE) as u32;

        for (x, y) in [(103u8, 49u8), (109, 46), (115, 48)] {
            let back = self.store.entrances.create_new();
            back.group = FINAL_ROOM as i32;
            back.dest = TOWER_ROOF | DEST_TAG_OUT;
            back.x = x;
            back.y = y;
            back.dest_x = 7;
            back.dest_y = 7;
        }

        // Ending hand-off, patched at its fixed address: one battle per
        // party, then the stock ending.
        let mut script = Vec::new();
        for (i, pack) in [0u8, 0, 0].iter().enumerate() {
            script.extend_from_slice(&[op::SET_ACTIVE_PARTY, i as u8 + 1]);
            script.extend_from_slice(&[0x4D, *pack, 0x36]); // battle
            script.extend_from_slice(&script::call(fixed::GAMEOVER_CHECK)?);
        }
        script.extend_from_slice(&[
            0xDC, 0x7E, // restore the bits the ending expects
            op::CLEAR_BIT, 0x9F,
            op::CLEAR_BIT, 0xFF,
        ]);
        script.extend_from_slice(&script::call(fixed::ENDING)?);
        script.push(op::END);
        self.image.write_at(fixed::ENDING_HANDOFF, &script)?;

        self.store
            .location_mut(TOWER_ROOF)
            .set_encounters_enabled(false);
        Ok(())
    }
}

/// Patch the opening so a fresh save drops the player at the tower's
/// doorstep with the full cast initialised and nothing else running.
fn patch_opening(store: &RecordStore, image: &mut RomImage) -> Result<()> {
    image.write_at(fixed::OPENING_CRAWL, &[0xFD; 4])?;

    let mut entry = script::call(fixed::OPENING_EVENT)?;
    entry.push(op::END);
    image.write_at(fixed::OPENING_ENTRY, &entry)?;

    let mut script = vec![
        0xB8, 0x42, // optional battle mechanics on
        0xB8, 0x43,
        0xB8, 0x4B,
        0x88, 0x00, 0x00, 0x00, // strip the lead's opening status
        op::ASSIGN_PARTY, 0x00, 0x00, // drop the three intro actors
        op::DELETE_CHAR, 0x00,
        op::ASSIGN_PARTY, 0x0E, 0x00,
        op::DELETE_CHAR, 0x0E,
        op::ASSIGN_PARTY, 0x0F, 0x00,
        op::DELETE_CHAR, 0x0F,
    ];
    for i in 0..party::CHARACTER_POOL {
        script.extend_from_slice(&[
            0x7F, i, i, // name
            0x37, i, i, // sprite
            0x43, i, store.char_palettes[i as usize],
            0x40, i, i, // properties
            0xD4, 0xE0 + i,
            0xD4, 0xF0 + i,
        ]);
    }
    script.extend_from_slice(&[
        op::CREATE_CHAR, 0x00,
        op::ASSIGN_PARTY, 0x00, 0x01,
        0x84, 0xFF, 0xFF, // starting gil
        op::LOAD_MAP, 0x01, 0x20, 160, 127, 0x00, 0xFF, // overworld, by the tower
        op::END,
    ]);
    image.write_at(fixed::OPENING_EVENT, &script)?;
    Ok(())
}

/// Top-level driver: clean the map graph, run the rotation generator,
/// assemble every floor in index order, then cap the structure.
pub(crate) fn execute_tower_mode(
    settings: &TowerSettings,
    store: &mut RecordStore,
    image: &mut RomImage,
) -> Result<TowerReport> {
    if !(2..=99).contains(&settings.floors) {
        return Err(TowerError::Config(format!(
            "floor count {} is outside the supported 2..=99 range",
            settings.floors
        )));
    }

    // Every progress membit starts raised; boss gates clear them one by
    // one on the way up.
    for i in 0..layout::INITIAL_MEMBIT_COUNT {
        image.write_at(layout::INITIAL_MEMBITS + i, &[0xFF])?;
    }

    // Clean prepass over every repurposable map. The first three maps
    // keep their exits, and the tower base keeps its long stairways.
    for id in 0..layout::LOCATION_COUNT as u16 {
        if is_banned_map(id) {
            continue;
        }
        store.location_mut(id).name_id = 0;
        if id > 2 {
            store.entrances.sever_group(id as i32);
        }
        if id != TOWER_BASE {
            store.long_entrances.sever_group(id as i32);
        }
        store.chests.sever_group(id as i32);
        store.npcs.sever_group(id as i32);
        store.events.sever_group(id as i32);
    }

    rom::number_location_names(image)?;
    patch_opening(store, image)?;

    let mut rng = checkpoint_rng(settings.seed, "pre-tower", 0);
    let rotation = party::generate_rotation(&mut rng, settings.floors)?;

    let floor_ids: Vec<u32> = (0..settings.floors).collect();
    let trinket_count = floor_ids.len().min(27);
    let trinket_floors: HashMap<u32, u8> = floor_ids
        .choose_multiple(&mut rng, trinket_count)
        .copied()
        .enumerate()
        .map(|(i, floor)| (floor, i as u8))
        .collect();
    let bonus_floor = rng.gen_range(0..settings.floors);

    let mut arena = ScriptArena::new(SCRATCH_START, SCRATCH_LIMIT);
    let shared = script::emit_shared_scripts(&mut arena, image)?;

    let floor_template = store.location(FLOOR_TEMPLATE).clone();
    let treasure_template = store.location(TREASURE_TEMPLATE).clone();
    store.location_mut(TOWER_BASE).set_palette(16);
    store.location_mut(TOWER_ROOF).set_palette(16);

    // Keeps the chest allocation ids aligned with the fixed content that
    // follows; the memid high bit is derived from those ids.
    let dummy = store.chests.create_new();
    dummy.group = 0;

    let mut builder = TowerBuilder {
        settings,
        store,
        image,
        arena,
        memoizer: ScriptMemoizer::new(),
        shared,
        npc_pool: npc_choice_pool(settings)?,
        floor_template,
        treasure_template,
        next_membit: 1,
        bonus_floor,
        trinket_floors,
    };

    let mut alloc = MapAllocator::new();
    let mut floors = Vec::with_capacity(settings.floors as usize);
    let mut prev: Option<u16> = None;
    for n in 0..settings.floors {
        let report = builder.assemble_floor(n, &mut alloc, &rotation, prev)?;
        prev = Some(report.outside_map);
        floors.push(report);
    }

    let last = floors.last().expect("at least two floors");
    let (last_price, last_message) = shops::tier_for_floor(last.index, settings.floors);
    builder.build_caps(last.outside_map, last_price, last_message)?;

    let scratch_used = builder.arena.cursor() - SCRATCH_START;
    Ok(TowerReport {
        floors,
        bonus_floor,
        scratch_used,
    })
}
