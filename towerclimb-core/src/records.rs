use crate::rom::RomImage;
use crate::shops::{self, ShopRecord};
use crate::{Result, TowerError};

/// Table layout of the target image. Grouped tables are a u16 pointer
/// table with one entry per location plus a terminator, offsets relative
/// to the end of the pointer table, followed by the packed records.
pub(crate) mod layout {
    pub const LOCATION_TABLE: usize = 0x2D_8F00;
    pub const LOCATION_SIZE: usize = 33;
    pub const LOCATION_COUNT: usize = 0x1A0;

    pub const EVENT_PTRS: usize = 0x4_0000;
    pub const EVENT_LIMIT: usize = 0x4_1A0F;
    pub const NPC_PTRS: usize = 0x4_1A10;
    pub const NPC_LIMIT: usize = 0x4_6AFF;
    pub const ENTRANCE_PTRS: usize = 0x1F_BB00;
    pub const ENTRANCE_LIMIT: usize = 0x1F_DFFF;
    pub const LONG_ENTRANCE_PTRS: usize = 0x2D_F480;
    pub const LONG_ENTRANCE_LIMIT: usize = 0x2D_FFFF;
    pub const CHEST_PTRS: usize = 0x2D_82F4;
    pub const CHEST_LIMIT: usize = 0x2D_8E5F;

    pub const INITIAL_MEMBITS: usize = 0x4_6B00;
    pub const INITIAL_MEMBIT_COUNT: usize = 32;

    pub const CHAR_PALETTES: usize = 0x2C_E2B0;
    pub const CHAR_PALETTE_COUNT: usize = 16;
}

/// Group index of a sub-record that no location owns. Severing a record
/// is an ordinary field write; the record only disappears when the table
/// is serialized back into the image.
pub(crate) const UNGROUPED: i32 = -1;

/// A named span inside a packed integer column. `set` forces the span to
/// all-ones, then all-zeroes, then ORs the new value in, so stale bits
/// can never survive and neighboring spans are never touched.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BitSpan {
    pub shift: u32,
    pub width: u32,
}

impl BitSpan {
    pub const fn mask(self) -> u32 {
        (1u32 << self.width) - 1
    }

    pub fn get(self, column: u32) -> u32 {
        (column >> self.shift) & self.mask()
    }

    pub fn set(self, column: &mut u32, value: u32) {
        assert!(
            value <= self.mask(),
            "value {:#X} does not fit in a {}-bit span",
            value,
            self.width
        );
        let span = self.mask() << self.shift;
        *column |= span;
        *column ^= span;
        *column |= value << self.shift;
    }
}

/// One map definition. The generator only touches the name id, the flag
/// bits and the palette; the rest of the row is carried opaquely so that
/// cloning a template preserves its tileset and geometry columns.
#[derive(Debug, Clone)]
pub(crate) struct LocationRecord {
    pub id: u16,
    pub name_id: u8,
    pub flags: u8,
    pub palette_index: u8,
    rest: [u8; 30],
}

const LOC_PALETTE: BitSpan = BitSpan { shift: 0, width: 6 };

const LOC_FLAG_ENCOUNTERS: u8 = 0x02;
#[allow(dead_code)]
const LOC_FLAG_WARPABLE: u8 = 0x10;

impl LocationRecord {
    fn parse(id: u16, raw: &[u8]) -> Self {
        let mut rest = [0u8; 30];
        rest.copy_from_slice(&raw[3..33]);
        LocationRecord {
            id,
            name_id: raw[0],
            flags: raw[1],
            palette_index: raw[2],
            rest,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.name_id);
        out.push(self.flags);
        out.push(self.palette_index);
        out.extend_from_slice(&self.rest);
    }

    /// Clone every data column from a template, keeping our own id.
    pub fn copy_data(&mut self, template: &LocationRecord) {
        self.name_id = template.name_id;
        self.flags = template.flags;
        self.palette_index = template.palette_index;
        self.rest = template.rest;
    }

    pub fn set_palette(&mut self, value: u32) {
        let mut column = self.palette_index as u32;
        LOC_PALETTE.set(&mut column, value);
        self.palette_index = column as u8;
    }

    pub fn set_encounters_enabled(&mut self, on: bool) {
        if on {
            self.flags |= LOC_FLAG_ENCOUNTERS;
        } else {
            self.flags &= !LOC_FLAG_ENCOUNTERS;
        }
    }
}

/// An NPC placement. `misc` packs the event pointer, the sprite palette
/// and the progress membit into one little-endian word.
#[derive(Debug, Clone)]
pub(crate) struct NpcRecord {
    pub group: i32,
    pub misc: u32,
    pub x: u8,
    pub y: u8,
    pub graphics: u8,
    pub facing: u8,
    reserved: u8,
}

const NPC_EVENT_PTR: BitSpan = BitSpan { shift: 0, width: 18 };
const NPC_PALETTE: BitSpan = BitSpan { shift: 18, width: 3 };
const NPC_MEMBIT: BitSpan = BitSpan { shift: 22, width: 10 };

impl NpcRecord {
    pub fn event_addr(&self) -> u32 {
        NPC_EVENT_PTR.get(self.misc)
    }

    pub fn set_event_addr(&mut self, event_addr: u32) {
        NPC_EVENT_PTR.set(&mut self.misc, event_addr);
    }

    pub fn palette(&self) -> u32 {
        NPC_PALETTE.get(self.misc)
    }

    pub fn set_palette(&mut self, palette_index: u32) {
        NPC_PALETTE.set(&mut self.misc, palette_index);
    }

    pub fn membit(&self) -> u32 {
        NPC_MEMBIT.get(self.misc)
    }

    pub fn set_membit(&mut self, membit: u32) {
        NPC_MEMBIT.set(&mut self.misc, membit);
    }
}

/// A walk-on trigger tile with the script it fires.
#[derive(Debug, Clone)]
pub(crate) struct EventRecord {
    pub group: i32,
    pub x: u8,
    pub y: u8,
    /// Bank-relative script pointer.
    pub event_addr: u32,
}

/// A directed map link. The destination word carries the facing/entry
/// tags merged into its high bits.
#[derive(Debug, Clone)]
pub(crate) struct EntranceRecord {
    pub group: i32,
    pub x: u8,
    pub y: u8,
    pub dest: u16,
    pub dest_x: u8,
    pub dest_y: u8,
}

/// Long-span entrances are never created by the generator; they are
/// carried opaquely so severing and write-back still work.
#[derive(Debug, Clone)]
pub(crate) struct LongEntranceRecord {
    pub group: i32,
    raw: [u8; 7],
}

/// A treasure container. The memory id spans nine bits: the low byte
/// plus one flag bit.
#[derive(Debug, Clone)]
pub(crate) struct ChestRecord {
    /// Allocation index across the whole chest table, in table order.
    pub id: u16,
    pub group: i32,
    pub x: u8,
    pub y: u8,
    pub flags: u8,
    pub memid_low: u8,
    pub contents: u8,
}

const CHEST_FLAG_MEMID_HIGH: u8 = 0x01;
const CHEST_FLAG_TREASURE: u8 = 0x20;

impl ChestRecord {
    pub fn memid(&self) -> u16 {
        let mut memid = self.memid_low as u16;
        if self.flags & CHEST_FLAG_MEMID_HIGH != 0 {
            memid |= 0x100;
        }
        memid
    }

    /// The high bit is deliberately taken from the chest's own allocation
    /// id rather than from `index`; chests past id 0xFF land in the upper
    /// half of the flag space regardless of the argument. Callers rely on
    /// allocation order to keep the two in step.
    pub fn set_memid(&mut self, index: u16) -> Result<()> {
        if index > 0x1FF {
            return Err(TowerError::EncodingRange {
                what: "chest memory id",
                value: index as u32,
                max: 0x1FF,
            });
        }
        if self.id & 0x100 != 0 {
            self.flags |= CHEST_FLAG_MEMID_HIGH;
        } else {
            self.flags &= !CHEST_FLAG_MEMID_HIGH;
        }
        self.memid_low = (index & 0xFF) as u8;
        Ok(())
    }

    pub fn is_treasure(&self) -> bool {
        self.flags & CHEST_FLAG_TREASURE != 0
    }

    pub fn set_treasure(&mut self, on: bool) {
        if on {
            self.flags |= CHEST_FLAG_TREASURE;
        } else {
            self.flags &= !CHEST_FLAG_TREASURE;
        }
    }
}

/// Serialization contract for records living in a grouped table.
pub(crate) trait GroupRecord: Sized {
    const SIZE: usize;

    fn parse(raw: &[u8]) -> Self;
    fn write(&self, out: &mut Vec<u8>);
    fn fresh() -> Self;
    fn group(&self) -> i32;
    fn set_group(&mut self, group: i32);

    /// Called with the record's table-order index after parse/create.
    /// Only chests care.
    fn assign_id(&mut self, _id: u16) {}
}

impl GroupRecord for EventRecord {
    const SIZE: usize = 5;

    fn parse(raw: &[u8]) -> Self {
        EventRecord {
            group: UNGROUPED,
            x: raw[0],
            y: raw[1],
            event_addr: raw[2] as u32 | (raw[3] as u32) << 8 | (raw[4] as u32) << 16,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.x);
        out.push(self.y);
        out.push((self.event_addr & 0xFF) as u8);
        out.push(((self.event_addr >> 8) & 0xFF) as u8);
        out.push(((self.event_addr >> 16) & 0xFF) as u8);
    }

    fn fresh() -> Self {
        EventRecord { group: UNGROUPED, x: 0, y: 0, event_addr: 0 }
    }

    fn group(&self) -> i32 {
        self.group
    }

    fn set_group(&mut self, group: i32) {
        self.group = group;
    }
}

impl GroupRecord for NpcRecord {
    const SIZE: usize = 9;

    fn parse(raw: &[u8]) -> Self {
        NpcRecord {
            group: UNGROUPED,
            misc: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            x: raw[4],
            y: raw[5],
            graphics: raw[6],
            facing: raw[7],
            reserved: raw[8],
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.misc.to_le_bytes());
        out.push(self.x);
        out.push(self.y);
        out.push(self.graphics);
        out.push(self.facing);
        out.push(self.reserved);
    }

    fn fresh() -> Self {
        NpcRecord {
            group: UNGROUPED,
            misc: 0,
            x: 0,
            y: 0,
            graphics: 0,
            facing: 0,
            reserved: 0,
        }
    }

    fn group(&self) -> i32 {
        self.group
    }

    fn set_group(&mut self, group: i32) {
        self.group = group;
    }
}

impl GroupRecord for EntranceRecord {
    const SIZE: usize = 6;

    fn parse(raw: &[u8]) -> Self {
        EntranceRecord {
            group: UNGROUPED,
            x: raw[0],
            y: raw[1],
            dest: u16::from_le_bytes([raw[2], raw[3]]),
            dest_x: raw[4],
            dest_y: raw[5],
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.x);
        out.push(self.y);
        out.extend_from_slice(&self.dest.to_le_bytes());
        out.push(self.dest_x);
        out.push(self.dest_y);
    }

    fn fresh() -> Self {
        EntranceRecord {
            group: UNGROUPED,
            x: 0,
            y: 0,
            dest: 0,
            dest_x: 0,
            dest_y: 0,
        }
    }

    fn group(&self) -> i32 {
        self.group
    }

    fn set_group(&mut self, group: i32) {
        self.group = group;
    }
}

impl GroupRecord for LongEntranceRecord {
    const SIZE: usize = 7;

    fn parse(raw: &[u8]) -> Self {
        let mut bytes = [0u8; 7];
        bytes.copy_from_slice(raw);
        LongEntranceRecord { group: UNGROUPED, raw: bytes }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.raw);
    }

    fn fresh() -> Self {
        LongEntranceRecord { group: UNGROUPED, raw: [0; 7] }
    }

    fn group(&self) -> i32 {
        self.group
    }

    fn set_group(&mut self, group: i32) {
        self.group = group;
    }
}

impl GroupRecord for ChestRecord {
    const SIZE: usize = 5;

    fn parse(raw: &[u8]) -> Self {
        ChestRecord {
            id: 0,
            group: UNGROUPED,
            x: raw[0],
            y: raw[1],
            flags: raw[2],
            memid_low: raw[3],
            contents: raw[4],
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.x);
        out.push(self.y);
        out.push(self.flags);
        out.push(self.memid_low);
        out.push(self.contents);
    }

    fn fresh() -> Self {
        ChestRecord {
            id: 0,
            group: UNGROUPED,
            x: 0,
            y: 0,
            flags: 0,
            memid_low: 0,
            contents: 0,
        }
    }

    fn group(&self) -> i32 {
        self.group
    }

    fn set_group(&mut self, group: i32) {
        self.group = group;
    }

    fn assign_id(&mut self, id: u16) {
        self.id = id;
    }
}

/// One grouped sub-record table held fully in memory. Insertion order is
/// preserved within a group; records severed to [`UNGROUPED`] are dropped
/// when the table is written back.
pub(crate) struct GroupedTable<T> {
    pub records: Vec<T>,
}

impl<T: GroupRecord> GroupedTable<T> {
    fn parse(image: &RomImage, ptr_base: usize) -> Result<Self> {
        let data_base = ptr_base + 2 * (layout::LOCATION_COUNT + 1);
        let mut records = Vec::new();

        for g in 0..layout::LOCATION_COUNT {
            let start = image.read_u16(ptr_base + 2 * g) as usize;
            let end = image.read_u16(ptr_base + 2 * (g + 1)) as usize;
            if end < start || (end - start) % T::SIZE != 0 {
                return Err(TowerError::Config(format!(
                    "grouped table at {:#X} has a malformed span for group {}",
                    ptr_base, g
                )));
            }
            let mut offset = start;
            while offset < end {
                let raw = image.slice(data_base + offset, T::SIZE);
                let mut record = T::parse(raw);
                record.set_group(g as i32);
                record.assign_id(records.len() as u16);
                records.push(record);
                offset += T::SIZE;
            }
        }

        Ok(GroupedTable { records })
    }

    pub fn create_new(&mut self) -> &mut T {
        let mut record = T::fresh();
        record.assign_id(self.records.len() as u16);
        self.records.push(record);
        let last = self.records.len() - 1;
        &mut self.records[last]
    }

    pub fn get_group(&self, group: i32) -> impl Iterator<Item = &T> {
        self.records.iter().filter(move |r| r.group() == group)
    }

    pub fn group_len(&self, group: i32) -> usize {
        self.get_group(group).count()
    }

    pub fn sever_group(&mut self, group: i32) {
        for record in self.records.iter_mut() {
            if record.group() == group {
                record.set_group(UNGROUPED);
            }
        }
    }

    fn write_back(
        &self,
        image: &mut RomImage,
        ptr_base: usize,
        limit: usize,
        region: &'static str,
    ) -> Result<()> {
        let data_base = ptr_base + 2 * (layout::LOCATION_COUNT + 1);
        let mut pointers = Vec::with_capacity(layout::LOCATION_COUNT + 1);
        let mut blob: Vec<u8> = Vec::new();

        for g in 0..layout::LOCATION_COUNT {
            pointers.push(blob.len());
            for record in self.get_group(g as i32) {
                record.write(&mut blob);
            }
        }
        pointers.push(blob.len());

        if blob.len() > 0xFFFF {
            return Err(TowerError::EncodingRange {
                what: "grouped table offset",
                value: blob.len() as u32,
                max: 0xFFFF,
            });
        }
        let needed = data_base + blob.len();
        if needed > limit + 1 {
            return Err(TowerError::ResourceExhausted { region, needed, limit });
        }

        for (g, offset) in pointers.iter().enumerate() {
            image.write_at(ptr_base + 2 * g, &(*offset as u16).to_le_bytes())?;
        }
        image.write_at(data_base, &blob)?;
        Ok(())
    }
}

/// Every table the generator reads or rewrites, parsed once from the
/// input image and written back once after generation.
pub(crate) struct RecordStore {
    pub locations: Vec<LocationRecord>,
    pub events: GroupedTable<EventRecord>,
    pub npcs: GroupedTable<NpcRecord>,
    pub entrances: GroupedTable<EntranceRecord>,
    pub long_entrances: GroupedTable<LongEntranceRecord>,
    pub chests: GroupedTable<ChestRecord>,
    pub shops: Vec<ShopRecord>,
    pub item_prices: Vec<u16>,
    pub char_palettes: [u8; layout::CHAR_PALETTE_COUNT],
}

impl RecordStore {
    pub fn parse(image: &RomImage) -> Result<Self> {
        let mut locations = Vec::with_capacity(layout::LOCATION_COUNT);
        for id in 0..layout::LOCATION_COUNT {
            let raw = image.slice(
                layout::LOCATION_TABLE + id * layout::LOCATION_SIZE,
                layout::LOCATION_SIZE,
            );
            locations.push(LocationRecord::parse(id as u16, raw));
        }

        let mut char_palettes = [0u8; layout::CHAR_PALETTE_COUNT];
        char_palettes.copy_from_slice(image.slice(
            layout::CHAR_PALETTES,
            layout::CHAR_PALETTE_COUNT,
        ));

        Ok(RecordStore {
            locations,
            events: GroupedTable::parse(image, layout::EVENT_PTRS)?,
            npcs: GroupedTable::parse(image, layout::NPC_PTRS)?,
            entrances: GroupedTable::parse(image, layout::ENTRANCE_PTRS)?,
            long_entrances: GroupedTable::parse(image, layout::LONG_ENTRANCE_PTRS)?,
            chests: GroupedTable::parse(image, layout::CHEST_PTRS)?,
            shops: shops::parse_shops(image),
            item_prices: shops::parse_item_prices(image),
            char_palettes,
        })
    }

    pub fn location(&self, id: u16) -> &LocationRecord {
        &self.locations[id as usize]
    }

    pub fn location_mut(&mut self, id: u16) -> &mut LocationRecord {
        &mut self.locations[id as usize]
    }

    pub fn write_back(&self, image: &mut RomImage) -> Result<()> {
        let mut row = Vec::with_capacity(layout::LOCATION_SIZE);
        for location in &self.locations {
            row.clear();
            location.write(&mut row);
            image.write_at(
                layout::LOCATION_TABLE + location.id as usize * layout::LOCATION_SIZE,
                &row,
            )?;
        }

        self.events
            .write_back(image, layout::EVENT_PTRS, layout::EVENT_LIMIT, "event table")?;
        self.npcs
            .write_back(image, layout::NPC_PTRS, layout::NPC_LIMIT, "npc table")?;
        self.entrances.write_back(
            image,
            layout::ENTRANCE_PTRS,
            layout::ENTRANCE_LIMIT,
            "entrance table",
        )?;
        self.long_entrances.write_back(
            image,
            layout::LONG_ENTRANCE_PTRS,
            layout::LONG_ENTRANCE_LIMIT,
            "long entrance table",
        )?;
        self.chests
            .write_back(image, layout::CHEST_PTRS, layout::CHEST_LIMIT, "chest table")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::IMAGE_SIZE;

    fn blank_image() -> RomImage {
        RomImage::new(vec![0u8; IMAGE_SIZE]).unwrap()
    }

    #[test]
    fn npc_packed_fields_round_trip() {
        let mut npc = NpcRecord::fresh();
        for addr in [0u32, 1, 0x1234, 0x3FFFF] {
            npc.set_event_addr(addr);
            assert_eq!(npc.event_addr(), addr);
        }
        for palette in 0..8u32 {
            npc.set_palette(palette);
            assert_eq!(npc.palette(), palette);
        }
        for membit in [0u32, 1, 0xFF, 0x3FF] {
            npc.set_membit(membit);
            assert_eq!(npc.membit(), membit);
        }
    }

    #[test]
    fn npc_packed_fields_do_not_bleed() {
        let mut npc = NpcRecord::fresh();
        npc.set_event_addr(0x3FFFF);
        npc.set_palette(7);
        npc.set_membit(0x3FF);

        npc.set_palette(2);
        assert_eq!(npc.event_addr(), 0x3FFFF);
        assert_eq!(npc.palette(), 2);
        assert_eq!(npc.membit(), 0x3FF);

        npc.set_event_addr(0);
        assert_eq!(npc.palette(), 2);
        assert_eq!(npc.membit(), 0x3FF);

        npc.set_membit(5);
        assert_eq!(npc.event_addr(), 0);
        assert_eq!(npc.palette(), 2);
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn oversized_span_value_is_a_programming_error() {
        let mut npc = NpcRecord::fresh();
        npc.set_palette(8);
    }

    #[test]
    fn location_palette_clears_stale_bits() {
        let mut location = LocationRecord::parse(0, &[0u8; 33]);
        location.palette_index = 0xFF; // high bits outside the span stay put
        location.set_palette(16);
        assert_eq!(location.palette_index, 0xC0 | 16);
        location.set_palette(1);
        assert_eq!(location.palette_index, 0xC0 | 1);
    }

    #[test]
    fn chest_memid_round_trips_through_the_flag_bit() {
        let mut chest = ChestRecord::fresh();
        chest.id = 0x100;
        chest.set_memid(0x1FF).unwrap();
        assert_eq!(chest.memid(), 0x1FF);

        chest.set_memid(0x05).unwrap();
        // Documented quirk: the high bit mirrors the chest's own id, so a
        // chest past id 0xFF reports 0x105 even though 0x05 was stored.
        assert_eq!(chest.memid(), 0x105);

        let mut low_chest = ChestRecord::fresh();
        low_chest.id = 0x42;
        low_chest.set_memid(0x1FF).unwrap();
        assert_eq!(low_chest.memid(), 0xFF);
    }

    #[test]
    fn chest_memid_rejects_out_of_range() {
        let mut chest = ChestRecord::fresh();
        let err = chest.set_memid(0x200).unwrap_err();
        assert!(matches!(err, TowerError::EncodingRange { .. }));
    }

    #[test]
    fn grouped_table_round_trips_and_drops_severed_records() {
        let mut image = blank_image();

        // Two events in group 3, one in group 5.
        let data_base = layout::EVENT_PTRS + 2 * (layout::LOCATION_COUNT + 1);
        for g in 0..layout::LOCATION_COUNT + 1 {
            let offset: u16 = if g <= 3 {
                0
            } else if g <= 5 {
                10
            } else {
                15
            };
            image
                .write_at(layout::EVENT_PTRS + 2 * g, &offset.to_le_bytes())
                .unwrap();
        }
        image
            .write_at(data_base, &[1, 2, 0xAA, 0xBB, 0x01, 3, 4, 0xCC, 0xDD, 0x02])
            .unwrap();
        image.write_at(data_base + 10, &[5, 6, 0xEE, 0xFF, 0x03]).unwrap();

        let mut table: GroupedTable<EventRecord> =
            GroupedTable::parse(&image, layout::EVENT_PTRS).unwrap();
        assert_eq!(table.records.len(), 3);
        assert_eq!(table.group_len(3), 2);
        assert_eq!(table.group_len(5), 1);
        assert_eq!(table.records[2].event_addr, 0x03FFEE);

        // Sever group 3 and add a fresh record to group 7.
        table.sever_group(3);
        let e = table.create_new();
        e.group = 7;
        e.x = 9;
        e.event_addr = 0x12345;

        table
            .write_back(&mut image, layout::EVENT_PTRS, layout::EVENT_LIMIT, "event table")
            .unwrap();
        let reparsed: GroupedTable<EventRecord> =
            GroupedTable::parse(&image, layout::EVENT_PTRS).unwrap();
        assert_eq!(reparsed.records.len(), 2);
        assert_eq!(reparsed.group_len(3), 0);
        assert_eq!(reparsed.group_len(5), 1);
        assert_eq!(reparsed.group_len(7), 1);
        let e = reparsed.get_group(7).next().unwrap();
        assert_eq!((e.x, e.event_addr), (9, 0x12345));
    }

    #[test]
    fn grouped_table_overflow_is_fatal() {
        let mut image = blank_image();
        let mut table: GroupedTable<EventRecord> =
            GroupedTable::parse(&image, layout::EVENT_PTRS).unwrap();

        // The event region holds (limit+1 - data_base) bytes; overfill it.
        let data_base = layout::EVENT_PTRS + 2 * (layout::LOCATION_COUNT + 1);
        let capacity = layout::EVENT_LIMIT + 1 - data_base;
        for _ in 0..capacity / EventRecord::SIZE + 1 {
            let e = table.create_new();
            e.group = 0;
        }

        let err = table
            .write_back(&mut image, layout::EVENT_PTRS, layout::EVENT_LIMIT, "event table")
            .unwrap_err();
        assert!(matches!(
            err,
            TowerError::ResourceExhausted { region: "event table", .. }
        ));
    }
}
