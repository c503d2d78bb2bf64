use std::borrow::Borrow;
use std::collections::btree_map::RangeMut;
use std::collections::BTreeMap as Map;
use std::ops::RangeBounds;

#[derive(Debug, Clone)]
pub enum BoundKind<'a, K, V> {
    None(&'a V),
    Lower(&'a K, &'a V),
    Upper(&'a K, &'a V),
    Both(&'a K, &'a K, &'a V),
}

impl<'a, K, V> BoundKind<'a, K, V> {
    pub fn lower(&self) -> Option<&'a K> {
        match self {
            Self::None(_) | Self::Upper(_, _) => None,
            Self::Lower(k, _) | Self::Both(k, _, _) => Some(k),
        }
    }

    pub fn upper(&self) -> Option<&'a K> {
        match self {
            Self::None(_) | Self::Lower(_, _) => None,
            Self::Upper(k, _) | Self::Both(_, k, _) => Some(k),
        }
    }

    pub fn value(&self) -> &'a V {
        match self {
            Self::None(v) | Self::Lower(_, v) | Self::Upper(_, v) | Self::Both(_, _, v) => v,
        }
    }
}

/// A map from split points to values; each value holds from its key up to
/// the next key. Points before the first key take the default.
#[derive(Debug, Clone)]
pub struct PartMap<K: Ord, V> {
    mapping: Map<K, V>,
    default: V,
}

impl<K, V> PartMap<K, V>
where
    K: Clone + Ord,
    V: Clone,
{
    pub fn new(default: V) -> Self {
        Self {
            mapping: Map::new(),
            default,
        }
    }

    pub fn default_value(&self) -> &V {
        &self.default
    }

    pub fn default_value_mut(&mut self) -> &mut V {
        &mut self.default
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn bounds(&self, point: &K) -> BoundKind<K, V> {
        let lb = self.mapping.range(..=point).next_back();
        let ub = self
            .mapping
            .range(point..)
            .find_map(|(k, _)| if k > point { Some(k) } else { None });

        match (lb, ub) {
            (None, None) => BoundKind::None(self.default_value()),
            (Some((l, v)), None) => BoundKind::Lower(l, v),
            (None, Some(u)) => BoundKind::Upper(u, self.default_value()),
            (Some((l, v)), Some(u)) => BoundKind::Both(l, u, v),
        }
    }

    pub fn get(&self, point: &K) -> Option<&V> {
        self.mapping.range(..=point).next_back().map(|(_, v)| v)
    }

    pub fn get_or_default(&self, point: &K) -> &V {
        self.get(point).unwrap_or_else(|| self.default_value())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.mapping.iter()
    }

    pub fn range_mut<'a, T, R>(&'a mut self, range: R) -> RangeMut<'a, K, V>
    where
        K: Borrow<T> + 'a,
        R: RangeBounds<T> + 'a,
        T: Ord + ?Sized + 'a,
    {
        self.mapping.range_mut(range)
    }

    pub fn split_mut(&mut self, at: &K) -> &mut V {
        self.split_mut_with(at, |_| ())
    }

    /// Ensures `at` is a split point. A new point starts as a copy of the
    /// value in force there, passed through `fresh`.
    pub fn split_mut_with<F>(&mut self, at: &K, fresh: F) -> &mut V
    where
        F: FnOnce(&mut V),
    {
        let inherited = match self.mapping.range(..=at).next_back() {
            Some((k, _)) if k == at => None,
            Some((_, v)) => Some(v.clone()),
            None => Some(self.default.clone()),
        };

        if let Some(mut value) = inherited {
            fresh(&mut value);
            self.mapping.insert(at.clone(), value);
        }

        self.mapping
            .entry(at.clone())
            .or_insert_with(|| self.default.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_points_inherit() {
        let mut map = PartMap::<isize, usize>::new(0);

        *map.split_mut(&5) = 5;
        *map.split_mut(&2) = 2;
        *map.split_mut(&3) = 4;
        *map.split_mut(&3) = 3;

        assert_eq!(map.get(&6), Some(&5));
        assert_eq!(map.get(&8), Some(&5));
        assert_eq!(map.get(&4), Some(&3));
        assert_eq!(map.get(&1), None);
        assert_eq!(map.get_or_default(&1), &0);

        let inherited = *map.split_mut_with(&4, |v| *v += 10);
        assert_eq!(inherited, 13);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn bounds_around_point() {
        let mut map = PartMap::<u32, char>::new('d');
        *map.split_mut(&10) = 'a';
        *map.split_mut(&20) = 'b';

        let b = map.bounds(&15);
        assert_eq!((b.lower(), b.upper(), b.value()), (Some(&10), Some(&20), &'a'));

        let b = map.bounds(&5);
        assert_eq!((b.lower(), b.upper(), b.value()), (None, Some(&10), &'d'));

        let b = map.bounds(&20);
        assert_eq!((b.lower(), b.upper(), b.value()), (Some(&20), None, &'b'));
    }
}
