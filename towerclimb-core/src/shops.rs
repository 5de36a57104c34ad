use crate::rom::RomImage;

pub(crate) const SHOP_TABLE: usize = 0x4_7AC0;
pub(crate) const SHOP_SIZE: usize = 9;
pub(crate) const SHOP_COUNT: usize = 128;

pub(crate) const ITEM_TABLE: usize = 0x18_5000;
pub(crate) const ITEM_SIZE: usize = 30;
pub(crate) const ITEM_COUNT: usize = 256;
pub(crate) const ITEM_PRICE_OFFSET: usize = 28;

const EMPTY_SLOT: u8 = 0xFF;

/// Canonical price tiers, ascending, each paired with the id of its
/// pre-rendered "that'll be N gil" dialogue line.
pub(crate) const PRICE_TIERS: &[(u16, u16)] = &[
    (10, 0x0A6B),
    (50, 0x0A6C),
    (100, 0x0A6D),
    (500, 0x0A6E),
    (1000, 0x0A6F),
    (1500, 0x0A70),
    (2000, 0x0A71),
    (3000, 0x0A72),
    (4000, 0x0A73),
    (5000, 0x0A74),
    (7000, 0x0A75),
    (8000, 0x0A5F),
    (10000, 0x0A63),
    (12000, 0x0A60),
    (15000, 0x0A61),
    (18000, 0x0A62),
    (20000, 0x0A67),
    (30000, 0x0A64),
    (40000, 0x0A65),
    (50000, 0x0A68),
    (60000, 0x0A66),
];

/// Linear interpolation of a floor index into the tier list: the first
/// floor charges the cheapest tier, the last floor the steepest.
pub(crate) fn tier_for_floor(floor: u32, floors: u32) -> (u16, u16) {
    let ratio = (floor as f64 / (floors - 1) as f64).min(1.0);
    let index = ((PRICE_TIERS.len() - 1) as f64 * ratio).round() as usize;
    PRICE_TIERS[index]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShopType {
    Weapons,
    Armor,
    Items,
    Relics,
    Misc,
}

#[derive(Debug, Clone)]
pub(crate) struct ShopRecord {
    pub id: u8,
    pub misc: u8,
    pub item_ids: [u8; 8],
}

impl ShopRecord {
    pub fn shop_type(&self) -> Option<ShopType> {
        match self.misc & 0x7 {
            1 => Some(ShopType::Weapons),
            2 => Some(ShopType::Armor),
            3 => Some(ShopType::Items),
            4 => Some(ShopType::Relics),
            5 => Some(ShopType::Misc),
            _ => None,
        }
    }

    /// Highest price among the shop's stock, or -1 for a shop that sells
    /// nothing. Placeholder shops are excluded from selection via the
    /// sentinel.
    pub fn rank(&self, item_prices: &[u16]) -> i32 {
        let mut rank = -1i32;
        for &id in &self.item_ids {
            if id == EMPTY_SLOT {
                continue;
            }
            let price = item_prices.get(id as usize).copied().unwrap_or(0);
            rank = rank.max(price as i32);
        }
        rank
    }
}

pub(crate) fn parse_shops(image: &RomImage) -> Vec<ShopRecord> {
    let mut shops = Vec::with_capacity(SHOP_COUNT);
    for id in 0..SHOP_COUNT {
        let raw = image.slice(SHOP_TABLE + id * SHOP_SIZE, SHOP_SIZE);
        let mut item_ids = [0u8; 8];
        item_ids.copy_from_slice(&raw[1..9]);
        shops.push(ShopRecord {
            id: id as u8,
            misc: raw[0],
            item_ids,
        });
    }
    shops
}

pub(crate) fn parse_item_prices(image: &RomImage) -> Vec<u16> {
    let mut prices = Vec::with_capacity(ITEM_COUNT);
    for id in 0..ITEM_COUNT {
        prices.push(image.read_u16(ITEM_TABLE + id * ITEM_SIZE + ITEM_PRICE_OFFSET));
    }
    prices
}
