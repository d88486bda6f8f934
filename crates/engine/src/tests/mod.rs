mod compaction_tests;
mod helpers;
