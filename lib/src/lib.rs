// Copyright 2020 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Query languages selecting revisions (revsets) and files (filesets) of a
//! version control repository.

#![warn(missing_docs)]
#![deny(unused_must_use)]
#![forbid(unsafe_code)]

pub mod dagop;
pub mod dsl_util;
pub mod fileset;
pub mod fileset_parser;
pub mod matchers;
pub mod repo;
pub mod repo_path;
pub mod revset;
pub mod revset_parser;
pub mod settings;
pub mod smartset;
pub mod str_util;
pub mod working_copy;
