use std::sync::Arc;

use crate::address::AddressValue;
use crate::bits;
use crate::disassembly::walker::{ParserContext, ParserState};
use crate::disassembly::Error;
use crate::space::AddressSpace;

/// A small pool of decode states keyed by instruction address.
///
/// Lookups hash on the low bits of the offset only, so sequential decoding
/// stays cheap. Within any window of `window` bytes, up to `minimum_reuse`
/// distinct addresses are guaranteed their own state.
#[derive(Debug, Clone)]
pub struct DisassemblyCache {
    contexts: Vec<ParserContext>,
    table: Vec<usize>,
    mask: u64,
    next_free: usize,
}

impl DisassemblyCache {
    pub fn new(
        const_space: Arc<AddressSpace>,
        context_words: usize,
        minimum_reuse: usize,
        window: usize,
    ) -> Result<Self, Error> {
        let mask = (window as u64).wrapping_sub(1);
        if window == 0 || bits::covering_mask(mask) != mask {
            return Err(Error::invariant("bad windowsize for disassembly cache"));
        }
        if minimum_reuse == 0 {
            return Err(Error::invariant("disassembly cache requires at least one context"));
        }

        let start = AddressValue::new(const_space.clone(), 0);
        let contexts = (0..minimum_reuse)
            .map(|_| ParserContext::new(start.clone(), const_space.clone(), context_words))
            .collect();

        Ok(Self {
            contexts,
            table: vec![0; window],
            mask,
            next_free: 0,
        })
    }

    pub fn minimum_reuse(&self) -> usize {
        self.contexts.len()
    }

    pub fn window(&self) -> usize {
        self.table.len()
    }

    /// Slot holding the state for `address`. A miss recycles the oldest
    /// slot and leaves it uninitialised.
    pub fn slot(&mut self, address: &AddressValue) -> usize {
        let hash = (address.offset() & self.mask) as usize;
        let slot = self.table[hash];
        if self.contexts[slot].address() == address {
            return slot;
        }

        let slot = self.next_free;
        self.next_free = (self.next_free + 1) % self.contexts.len();

        let context = &mut self.contexts[slot];
        context.set_address(address.clone());
        context.set_parser_state(ParserState::Uninitialised);

        self.table[hash] = slot;
        slot
    }

    pub fn context(&self, slot: usize) -> &ParserContext {
        &self.contexts[slot]
    }

    pub fn context_mut(&mut self, slot: usize) -> &mut ParserContext {
        &mut self.contexts[slot]
    }

    /// The cached state for `address` if it is still resident.
    pub fn cached(&self, address: &AddressValue) -> Option<&ParserContext> {
        let hash = (address.offset() & self.mask) as usize;
        let context = &self.contexts[self.table[hash]];
        if context.address() == address {
            Some(context)
        } else {
            self.contexts.iter().find(|c| c.address() == address)
        }
    }

    /// Forgets decodes in `[begin, end)`, or from `begin` onwards when
    /// `end` is `None`, other than the one held in `keep`.
    pub fn invalidate(&mut self, begin: &AddressValue, end: Option<&AddressValue>, keep: usize) {
        for (slot, context) in self.contexts.iter_mut().enumerate() {
            let address = context.address();
            if slot == keep || address.space() != begin.space() {
                continue;
            }
            let offset = address.offset();
            if offset >= begin.offset() && end.map_or(true, |end| offset < end.offset()) {
                context.set_parser_state(ParserState::Uninitialised);
            }
        }
    }

    /// Forgets every cached decode.
    pub fn clear(&mut self) {
        for context in self.contexts.iter_mut() {
            context.set_parser_state(ParserState::Uninitialised);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::space::SpaceKind;
    use crate::space_manager::SpaceManager;

    fn cache(reuse: usize, window: usize) -> (DisassemblyCache, Arc<AddressSpace>) {
        let mut manager = SpaceManager::new();
        let ram = manager.add_space(SpaceKind::Default, "ram", 4, 1, None, 0);
        let cache = DisassemblyCache::new(manager.constant_space().clone(), 1, reuse, window)
            .unwrap();
        (cache, ram)
    }

    #[test]
    fn window_must_be_power_of_two() {
        let manager = SpaceManager::new();
        assert!(DisassemblyCache::new(manager.constant_space().clone(), 1, 2, 24).is_err());
        assert!(DisassemblyCache::new(manager.constant_space().clone(), 1, 0, 32).is_err());
    }

    #[test]
    fn distinct_addresses_within_reuse_bound() {
        let (mut cache, ram) = cache(8, 256);

        let addresses = (0..8)
            .map(|i| AddressValue::new(ram.clone(), 0x1000 + i * 4))
            .collect::<Vec<_>>();
        let slots = addresses.iter().map(|a| cache.slot(a)).collect::<Vec<_>>();

        for (i, a) in slots.iter().enumerate() {
            for b in slots[i + 1..].iter() {
                assert_ne!(a, b);
            }
        }

        for (address, slot) in addresses.iter().zip(slots.iter()) {
            assert_eq!(cache.slot(address), *slot);
            assert_eq!(cache.context(*slot).address(), address);
        }
    }

    #[test]
    fn hit_keeps_state_and_miss_resets() {
        let (mut cache, ram) = cache(2, 32);
        let a = AddressValue::new(ram.clone(), 0x10);
        let b = AddressValue::new(ram.clone(), 0x11);
        let c = AddressValue::new(ram, 0x12);

        let slot = cache.slot(&a);
        cache.context_mut(slot).set_parser_state(ParserState::PCode);
        assert_eq!(cache.slot(&a), slot);
        assert_eq!(cache.context(slot).parser_state(), ParserState::PCode);

        cache.slot(&b);
        let recycled = cache.slot(&c);
        assert_eq!(recycled, slot);
        assert_eq!(cache.context(recycled).parser_state(), ParserState::Uninitialised);
        assert!(cache.cached(&a).is_none());
    }

    #[test]
    fn invalidate_spares_kept_slot() {
        let (mut cache, ram) = cache(4, 32);
        let slots = (0..4)
            .map(|i| {
                let slot = cache.slot(&AddressValue::new(ram.clone(), i));
                cache.context_mut(slot).set_parser_state(ParserState::Disassembly);
                slot
            })
            .collect::<Vec<_>>();

        let begin = AddressValue::new(ram.clone(), 1);
        let end = AddressValue::new(ram, 3);
        cache.invalidate(&begin, Some(&end), slots[2]);

        let states = slots
            .iter()
            .map(|slot| cache.context(*slot).parser_state())
            .collect::<Vec<_>>();
        assert_eq!(
            states,
            vec![
                ParserState::Disassembly,
                ParserState::Uninitialised,
                ParserState::Disassembly,
                ParserState::Disassembly,
            ]
        );

        cache.invalidate(&begin, None, slots[0]);
        assert!(slots[1..]
            .iter()
            .all(|slot| cache.context(*slot).parser_state() == ParserState::Uninitialised));
    }
}
