/*!
This crate renders a compiled [`Ensemble`](grove_tree::Ensemble) into source text. Each target language implements [`Emitter`]. The only target so far is C++, see [`CppEmitter`].
*/

#![allow(clippy::tabs_in_doc_comments)]

mod cpp;

pub use self::cpp::{render_statement, CppEmitter, CppSource};

/// An `Emitter` renders the decision procedures and the combination loop of an ensemble for one target language.
pub trait Emitter {
	type Output;
	fn emit(&self, ensemble: &grove_tree::Ensemble) -> Self::Output;
}
