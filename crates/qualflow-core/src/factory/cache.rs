//! Bounded caches behind the factory
//!
//! Both caches are disabled outright by `do_not_cache`. Annotated types are keyed by the
//! tree alone and are only valid once the enclosing method has been analysed; inference
//! solutions are keyed by the call site and its argument types, which is all an
//! invocation's result depends on.

use crate::config::AnalysisOptions;
use crate::error::InferenceError;
use crate::hir::ExprId;
use crate::infer::InferenceSolution;
use crate::qualifier::AnnotatedType;
use lru::LruCache;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct InferenceKey {
    pub call: ExprId,
    /// `None` for lambda arguments
    pub args: Vec<Option<AnnotatedType>>,
}

/// Snapshot of cache occupancy and effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub types: usize,
    pub inferences: usize,
    pub hits: usize,
    pub misses: usize,
}

pub(crate) struct FactoryCaches {
    types: Option<LruCache<ExprId, AnnotatedType>>,
    inferences: Option<LruCache<InferenceKey, Result<InferenceSolution, InferenceError>>>,
    hits: usize,
    misses: usize,
}

impl FactoryCaches {
    pub fn new(options: &AnalysisOptions) -> Self {
        let capacity = options.effective_cache_size();
        Self {
            types: capacity.map(LruCache::new),
            inferences: capacity.map(LruCache::new),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get_type(&mut self, expr: ExprId) -> Option<AnnotatedType> {
        let found = self.types.as_mut()?.get(&expr).cloned();
        self.count(found.is_some(), "type");
        found
    }

    pub fn put_type(&mut self, expr: ExprId, ty: AnnotatedType) {
        if let Some(cache) = self.types.as_mut() {
            cache.put(expr, ty);
        }
    }

    pub fn get_inference(&mut self, key: &InferenceKey) -> Option<Result<InferenceSolution, InferenceError>> {
        let found = self.inferences.as_mut()?.get(key).cloned();
        self.count(found.is_some(), "inference");
        found
    }

    pub fn put_inference(&mut self, key: InferenceKey, result: Result<InferenceSolution, InferenceError>) {
        if let Some(cache) = self.inferences.as_mut() {
            cache.put(key, result);
        }
    }

    /// Drop annotated types; stores they were computed from may have changed
    pub fn invalidate_types(&mut self) {
        if let Some(cache) = self.types.as_mut() {
            cache.clear();
        }
    }

    pub fn clear(&mut self) {
        self.invalidate_types();
        if let Some(cache) = self.inferences.as_mut() {
            cache.clear();
        }
        self.hits = 0;
        self.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            types: self.types.as_ref().map_or(0, LruCache::len),
            inferences: self.inferences.as_ref().map_or(0, LruCache::len),
            hits: self.hits,
            misses: self.misses,
        }
    }

    fn count(&mut self, hit: bool, cache: &'static str) {
        if hit {
            self.hits += 1;
            tracing::trace!(cache, "cache hit");
        } else {
            self.misses += 1;
            tracing::trace!(cache, "cache miss");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let options = AnalysisOptions {
            do_not_cache: true,
            ..AnalysisOptions::default()
        };
        let mut caches = FactoryCaches::new(&options);
        caches.put_type(ExprId(1), AnnotatedType::unqualified(Type::int()));
        assert_eq!(caches.get_type(ExprId(1)), None);
        assert_eq!(caches.stats(), CacheStats::default());
    }

    #[test]
    fn test_cache_is_bounded() {
        let options = AnalysisOptions {
            cache_size: 2,
            ..AnalysisOptions::default()
        };
        let mut caches = FactoryCaches::new(&options);
        for id in 0..3 {
            caches.put_type(ExprId(id), AnnotatedType::unqualified(Type::int()));
        }
        assert_eq!(caches.stats().types, 2);
        assert_eq!(caches.get_type(ExprId(0)), None);
        assert!(caches.get_type(ExprId(2)).is_some());
        assert_eq!(caches.stats().hits, 1);
        assert_eq!(caches.stats().misses, 1);
    }

    #[test]
    fn test_invalidation_keeps_inference_results() {
        let mut caches = FactoryCaches::new(&AnalysisOptions::default());
        let key = InferenceKey {
            call: ExprId(9),
            args: vec![None],
        };
        caches.put_type(ExprId(9), AnnotatedType::unqualified(Type::int()));
        caches.put_inference(key.clone(), Ok(InferenceSolution::default()));
        caches.invalidate_types();
        assert_eq!(caches.stats().types, 0);
        assert_eq!(caches.get_inference(&key), Some(Ok(InferenceSolution::default())));
    }
}
