use crate::engine::error::{EngineError, EngineResult};
use crate::engine::module::Effect;
use std::collections::BTreeMap;

pub type EffectConstructor = fn() -> Box<dyn Effect>;

/// Maps stable effect-type ids to constructors.
#[derive(Default)]
pub struct ModuleFactory {
    constructors: BTreeMap<u8, EffectConstructor>,
}

impl ModuleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, effect_type: u8, constructor: EffectConstructor) -> EngineResult<()> {
        if self.constructors.contains_key(&effect_type) {
            return Err(EngineError::DuplicateEffect(effect_type));
        }
        self.constructors.insert(effect_type, constructor);
        Ok(())
    }

    pub fn contains(&self, effect_type: u8) -> bool {
        self.constructors.contains_key(&effect_type)
    }

    pub fn effect_types(&self) -> impl Iterator<Item = u8> + '_ {
        self.constructors.keys().copied()
    }

    pub fn create(&self, effect_type: u8) -> EngineResult<Box<dyn Effect>> {
        self.constructors
            .get(&effect_type)
            .map(|constructor| constructor())
            .ok_or(EngineError::UnknownEffect(effect_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::channel_data::ChannelData;
    use crate::engine::module::{EffectInfo, ModuleContext};

    static NULL_INFO: EffectInfo = EffectInfo {
        name: "Null",
        parameters: &[],
    };

    struct Null;

    impl Effect for Null {
        fn info(&self) -> &'static EffectInfo {
            &NULL_INFO
        }

        fn process(&mut self, _context: &ModuleContext<'_>, _data: &mut ChannelData<'_>) {}
    }

    fn null() -> Box<dyn Effect> {
        Box::new(Null)
    }

    #[test]
    fn test_create_registered_effect() {
        let mut factory = ModuleFactory::new();
        factory.register(4, null).unwrap();
        assert!(factory.contains(4));
        assert_eq!(factory.create(4).map(|e| e.info().name), Ok("Null"));
        assert_eq!(factory.effect_types().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_unknown_and_duplicate_ids() {
        let mut factory = ModuleFactory::new();
        factory.register(1, null).unwrap();
        assert_eq!(factory.register(1, null), Err(EngineError::DuplicateEffect(1)));
        assert_eq!(
            factory.create(2).err().map(|e| e.to_string()),
            Some(EngineError::UnknownEffect(2).to_string())
        );
    }
}
