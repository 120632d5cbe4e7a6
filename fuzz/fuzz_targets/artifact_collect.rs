#![no_main]

use ferry::artifacts::{ArtifactStore, MemoryArtifactStore, collect_artifacts};
use ferry::mapper::ArtifactNameMapper;
use ferry_config::Config;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|names: Vec<String>| {
    let table = Config::default().target_table("app");
    let Ok(mapper) = ArtifactNameMapper::new(table) else {
        return;
    };

    let store = MemoryArtifactStore::new();
    for name in &names {
        let _ = store.put(name, b"bin");
    }

    if let Ok(artifacts) = collect_artifacts(&store, &mapper) {
        // Success means every target produced exactly one artifact.
        assert_eq!(artifacts.len(), mapper.targets().len());
        for (artifact, target) in artifacts.iter().zip(mapper.targets()) {
            assert_eq!(&artifact.target, target);
            assert_eq!(artifact.canonical_name, target.canonical_name);
        }
    }
});
