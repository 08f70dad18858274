// This file is part of Ember.
//
// Ember is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Ember is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Ember.  If not, see <http://www.gnu.org/licenses/>.

//! Yang's type model. `Error` is assigned to expressions whose type
//! cannot be determined; it unifies with anything so one mistake doesn't
//! cascade into a wall of diagnostics.

use std::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TypeBase {
    Error,
    /// A name that is in scope but lives in an enclosing function;
    /// inaccessible, since closures over locals are not implemented.
    EnclosingFunction,
    Void,
    Int,
    World,
    Function,
    UserType,
}

#[derive(Clone, Debug)]
pub struct Type {
    base: TypeBase,
    count: usize,
    is_const: bool,
    /// For functions, element 0 is the return type and the rest are
    /// argument types.
    elements: Vec<Type>,
    user_type_name: String,
}

impl Type {
    /// A count greater than one constructs a vector type, allowed only
    /// for `Int` and `World`; anything else collapses to `Error`.
    pub fn new(base: TypeBase, count: usize) -> Self {
        let mut base = base;
        let mut count = count;
        if count == 0 || (count != 1 && base != TypeBase::Int && base != TypeBase::World) {
            base = TypeBase::Error;
            count = 1;
        }
        Self {
            base,
            count,
            is_const: false,
            elements: Vec::new(),
            user_type_name: String::new(),
        }
    }

    pub fn error() -> Self {
        Self::new(TypeBase::Error, 1)
    }

    pub fn void() -> Self {
        Self::new(TypeBase::Void, 1)
    }

    pub fn int() -> Self {
        Self::new(TypeBase::Int, 1)
    }

    pub fn world() -> Self {
        Self::new(TypeBase::World, 1)
    }

    pub fn int_vector(count: usize) -> Self {
        Self::new(TypeBase::Int, count)
    }

    pub fn world_vector(count: usize) -> Self {
        Self::new(TypeBase::World, count)
    }

    pub fn enclosing_function() -> Self {
        Self::new(TypeBase::EnclosingFunction, 1)
    }

    pub fn function(return_type: Type, args: Vec<Type>) -> Self {
        let mut elements = Vec::with_capacity(1 + args.len());
        elements.push(return_type);
        elements.extend(args);
        Self {
            base: TypeBase::Function,
            count: 1,
            is_const: false,
            elements,
            user_type_name: String::new(),
        }
    }

    pub fn user_type(name: impl Into<String>) -> Self {
        Self {
            base: TypeBase::UserType,
            count: 1,
            is_const: false,
            elements: Vec::new(),
            user_type_name: name.into(),
        }
    }

    pub fn with_const(mut self, is_const: bool) -> Self {
        self.is_const = is_const;
        self
    }

    pub fn base(&self) -> TypeBase {
        self.base
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_const(&self) -> bool {
        self.is_const
    }

    pub fn user_type_name(&self) -> &str {
        &self.user_type_name
    }

    // The following predicates also hold for `Error`, so that erroneous
    // subexpressions satisfy whatever the context requires.

    pub fn is_error(&self) -> bool {
        self.base == TypeBase::Error
    }

    pub fn is_void(&self) -> bool {
        self.is_error() || self.base == TypeBase::Void
    }

    pub fn not_void(&self) -> bool {
        self.base != TypeBase::Void
    }

    pub fn primitive(&self) -> bool {
        self.is_error() || (self.count == 1 && (self.is_int() || self.is_world()))
    }

    pub fn is_vector(&self) -> bool {
        self.is_error() || (self.count > 1 && (self.is_int() || self.is_world()))
    }

    pub fn is_int(&self) -> bool {
        self.is_error() || self.base == TypeBase::Int
    }

    pub fn is_world(&self) -> bool {
        self.is_error() || self.base == TypeBase::World
    }

    pub fn function_type(&self) -> bool {
        self.is_error() || self.base == TypeBase::Function
    }

    pub fn is_user_type(&self) -> bool {
        self.is_error() || self.base == TypeBase::UserType
    }

    pub fn elements(&self, index: usize) -> &Type {
        &self.elements[index]
    }

    pub fn element_size(&self) -> usize {
        self.elements.len()
    }

    pub fn add_element(&mut self, element: Type) {
        self.elements.push(element);
    }

    /// True if the element-counts allow interaction: equal counts work
    /// pointwise; a count of one broadcasts.
    pub fn count_binary_match(&self, other: &Type) -> bool {
        self.is_error()
            || other.is_error()
            || self.count == other.count
            || self.count == 1
            || other.count == 1
    }

    /// Identical up to errors.
    pub fn is(&self, other: &Type) -> bool {
        *self == *other || self.is_error() || other.is_error()
    }

    /// The common type, or `Error` when they disagree.
    pub fn unify(&self, other: &Type) -> Type {
        if self.is_error() {
            return other.clone();
        }
        if other.is_error() {
            return self.clone();
        }
        if *self != *other {
            Type::error()
        } else {
            self.clone()
        }
    }
}

// Raw structural equality, ignoring const. Don't use directly for
// type-checking; `is` and `unify` handle errors.
impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
            && self.count == other.count
            && self.elements == other.elements
            && self.user_type_name == other.user_type_name
    }
}
impl Eq for Type {}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.base == TypeBase::Function {
            write!(f, "{}(", self.elements[0])?;
            for (i, element) in self.elements[1..].iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", element)?;
            }
            write!(f, ")")?;
        } else {
            let s = match self.base {
                TypeBase::Void => "void",
                TypeBase::Int => "int",
                TypeBase::World => "world",
                TypeBase::EnclosingFunction => "<enclosing function member>",
                TypeBase::UserType => self.user_type_name.as_str(),
                _ => "error",
            };
            write!(f, "{}", s)?;
            if self.count > 1 {
                write!(f, "{}", self.count)?;
            }
        }
        if self.is_const {
            write!(f, " const")?;
        }
        Ok(())
    }
}

impl Type {
    /// Backtick-quoted form for diagnostics.
    pub fn string(&self) -> String {
        format!("`{}`", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_vector_collapses_to_error() {
        assert!(Type::new(TypeBase::Void, 3).is_error());
        assert!(Type::new(TypeBase::Int, 0).is_error());
        assert!(!Type::int_vector(3).is_error());
    }

    #[test]
    fn test_error_unifies_with_anything() {
        assert!(Type::error().is(&Type::int()));
        assert!(Type::int().is(&Type::error()));
        assert_eq!(Type::error().unify(&Type::world()), Type::world());
        assert!(Type::int().unify(&Type::world()).is_error());
    }

    #[test]
    fn test_count_binary_match() {
        assert!(Type::int().count_binary_match(&Type::int_vector(3)));
        assert!(Type::int_vector(3).count_binary_match(&Type::int_vector(3)));
        assert!(!Type::int_vector(2).count_binary_match(&Type::int_vector(3)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::int().to_string(), "int");
        assert_eq!(Type::world_vector(2).to_string(), "world2");
        let f = Type::function(Type::int(), vec![Type::int(), Type::world()]);
        assert_eq!(f.to_string(), "int(int, world)");
        assert_eq!(Type::int().with_const(true).to_string(), "int const");
    }
}
